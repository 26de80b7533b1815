//! Per-file display metadata (mime type, color, icon).
//!
//! Lookup order: exact file name, `.bash*` dotfiles, extension. Two name
//! patterns then override whatever matched: anything containing `eslint`, and
//! `*.js.map` source maps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

const DEFAULT_MIME: &str = "text/plain";
const DEFAULT_COLOR: &str = "white";
const DEFAULT_ICON: &str = "file";
const ICON_PREFIX: &str = "mdi-";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub mime: String,
    pub color: String,
    pub icon: String,
}

#[derive(Clone, Copy, Default)]
struct Rule {
    mime: Option<&'static str>,
    color: Option<&'static str>,
    icon: Option<&'static str>,
}

const fn rule(
    mime: Option<&'static str>,
    color: Option<&'static str>,
    icon: Option<&'static str>,
) -> Rule {
    Rule { mime, color, icon }
}

static BY_NAME: LazyLock<HashMap<&'static str, Rule>> = LazyLock::new(|| {
    HashMap::from([
        ("Dockerfile", rule(Some("text/x-dockerfile"), Some("#3A8CB4"), Some("docker"))),
        ("CMakeLists.txt", rule(Some("text/x-cmake"), Some("#649AD2"), Some("language-c"))),
        ("package.json", rule(Some("application/json"), Some("#F53E44"), Some("npm-variant-outline"))),
        ("yarn.lock", rule(Some("text/plain"), Some("#89BB5A"), Some("nodejs"))),
        (".browserslistrc", rule(Some("text/plain"), None, Some("web-box"))),
        (".editorconfig", rule(Some("text/plain"), None, Some("pencil-box"))),
        (".gitignore", rule(Some("text/plain"), Some("#F54D27"), Some("git"))),
    ])
});

const BASH_DOTFILE: Rule = rule(Some("text/x-sh"), None, Some("file-code"));

static BY_EXTENSION: LazyLock<HashMap<&'static str, Rule>> = LazyLock::new(|| {
    let mut table = HashMap::new();
    let mut add = |exts: &[&'static str], r: Rule| {
        for ext in exts {
            table.insert(*ext, r);
        }
    };

    add(&["c", "h"], rule(Some("text/x-csrc"), Some("#649AD2"), Some("language-c")));
    add(&["cpp", "hpp"], rule(Some("text/x-csrc"), Some("#649AD2"), Some("language-cpp")));
    add(&["css"], rule(Some("text/x-css"), Some("#2673BA"), Some("language-css3")));
    add(&["diff", "patch"], rule(Some("text/x-diff"), None, Some("vector-difference")));
    add(&["groovy"], rule(Some("text/x-groovy"), Some("#5382A1"), Some("language-java")));
    add(&["hs", "lhs"], rule(Some("text/x-haskell"), Some("#649AD2"), Some("language-haskell")));
    add(&["html", "htm"], rule(Some("text/html"), Some("#E44D26"), Some("language-html5")));
    add(&["dmg", "hddimg", "img", "iso", "pkg"], rule(None, None, Some("harddisk")));
    add(&["java"], rule(Some("text/x-java"), Some("#5382A1"), Some("language-java")));
    add(&["js"], rule(Some("text/javascript"), Some("#F0DB4F"), Some("language-javascript")));
    add(&["json"], rule(Some("application/json"), None, Some("code-json")));
    add(&["md"], rule(Some("text/x-markdown"), Some("#3598DA"), Some("language-markdown")));
    add(&["pdf"], rule(None, Some("#DB1B23"), Some("file-pdf")));
    add(&["pl", "pm"], rule(Some("text/x-perl"), None, Some("file-code")));
    add(&["php"], rule(Some("text/x-php"), None, Some("language-php")));
    add(&["py"], rule(Some("text/x-python"), Some("#3674A5"), Some("language-python")));
    add(&["rst"], rule(Some("text/x-rst"), None, Some("file-document")));
    add(&["rb"], rule(Some("text/x-ruby"), None, None));
    add(&["sc", "scala"], rule(Some("text/x-scala"), None, Some("file-code")));
    add(&["scss"], rule(Some("text/x-scss"), Some("#2673BA"), Some("language-css3")));
    add(&["sh", "bash"], rule(Some("text/x-sh"), None, Some("file-code")));
    add(&["stl"], rule(None, None, Some("cube-scan")));
    add(&["svg"], rule(None, None, Some("svg")));
    add(&["ts"], rule(Some("text/typescript"), Some("#2A7ACC"), Some("language-typescript")));
    add(&["vue"], rule(Some("text/x-vue"), Some("#41B883"), Some("vuejs")));
    add(&["yml", "yaml"], rule(Some("text/x-yaml"), None, Some("file-code")));
    add(&["xml"], rule(Some("application/xml"), None, Some("file-code")));
    add(&["gif"], rule(None, None, Some("gif")));
    add(&["bmp", "ico", "jpeg", "jpg", "png"], rule(None, None, Some("file-image")));
    add(&["eot", "otf", "ttf", "woff", "woff2"], rule(None, None, Some("format-font")));
    table
});

/// Resolve display metadata for a file name and its extension (no dot).
pub fn resolve(name: &str, extension: &str) -> FileMetadata {
    let matched = BY_NAME
        .get(name)
        .copied()
        .or_else(|| name.starts_with(".bash").then_some(BASH_DOTFILE))
        .or_else(|| BY_EXTENSION.get(extension).copied())
        .unwrap_or_default();

    let mut mime = matched
        .mime
        .or_else(|| mime_guess::from_ext(extension).first_raw())
        .unwrap_or(DEFAULT_MIME);
    let mut color = matched.color.unwrap_or(DEFAULT_COLOR);
    let mut icon = matched.icon.unwrap_or(DEFAULT_ICON);

    if name.contains("eslint") {
        color = "#8080F2";
        icon = "eslint";
    } else if name.ends_with(".js.map") {
        mime = "text/javascript";
        color = "#F0DB4F";
        icon = "language-javascript";
    }

    FileMetadata {
        mime: mime.to_string(),
        color: color.to_string(),
        icon: format!("{}{}", ICON_PREFIX, icon),
    }
}
