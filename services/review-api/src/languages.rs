//! Languages offered by the review UI

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Language {
    pub id: &'static str,
    pub name: &'static str,
    pub extension: &'static str,
}

const fn lang(id: &'static str, name: &'static str, extension: &'static str) -> Language {
    Language {
        id,
        name,
        extension,
    }
}

pub const LANGUAGES: &[Language] = &[
    lang("javascript", "JavaScript", "js"),
    lang("typescript", "TypeScript", "ts"),
    lang("python", "Python", "py"),
    lang("java", "Java", "java"),
    lang("cpp", "C++", "cpp"),
    lang("c", "C", "c"),
    lang("csharp", "C#", "cs"),
    lang("go", "Go", "go"),
    lang("rust", "Rust", "rs"),
    lang("php", "PHP", "php"),
    lang("ruby", "Ruby", "rb"),
    lang("swift", "Swift", "swift"),
    lang("kotlin", "Kotlin", "kt"),
    lang("sql", "SQL", "sql"),
    lang("html", "HTML", "html"),
    lang("css", "CSS", "css"),
];
