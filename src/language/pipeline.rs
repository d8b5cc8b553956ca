use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::types::ImagesConfig;
use crate::language::Language;

/// Where the session directory is mounted inside the container (read-only).
pub const GUEST_SOURCE_DIR: &str = "/app";

/// Writable scratch directory for build outputs, backed by a tmpfs.
pub const GUEST_BUILD_DIR: &str = "/tmp/build";

/// File stem used for Java sources without a `public class` declaration.
const DEFAULT_JAVA_CLASS: &str = "Main";

static JAVA_CLASS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"public\s+class\s+(\w+)").expect("valid regex"));

/// Static description of how one guest language is built and run.
///
/// Command templates understand three placeholders:
/// - `{source}`: absolute in-container path of the source file
/// - `{stem}`: source file name without extension
/// - `{build}`: writable in-container build directory
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub language: Language,
    pub image: String,
    pub extension: &'static str,
    pub build: Option<&'static str>,
    pub run: &'static str,
}

impl LanguageProfile {
    fn new(language: Language, images: &ImagesConfig) -> Self {
        let image = images.image_for(language).to_string();
        match language {
            Language::Javascript => Self {
                language,
                image,
                extension: "js",
                build: None,
                run: "node {source}",
            },
            Language::Python => Self {
                language,
                image,
                extension: "py",
                build: None,
                run: "python {source}",
            },
            Language::Java => Self {
                language,
                image,
                extension: "java",
                build: Some("javac -d {build} {source}"),
                run: "java -cp {build} {stem}",
            },
            Language::Cpp => Self {
                language,
                image,
                extension: "cpp",
                build: Some("g++ -o {build}/{stem} {source}"),
                run: "{build}/{stem}",
            },
        }
    }

    /// Name of the source file for this session.
    ///
    /// Java needs the file named after its public class; everything else is
    /// keyed by the session id.
    pub fn source_stem(&self, code: &str, session_id: &str) -> String {
        match self.language {
            Language::Java => extract_java_class_name(code).to_string(),
            _ => session_id.to_string(),
        }
    }
}

/// A fully rendered execution plan for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub language: Language,
    pub image: String,
    /// Source file name, relative to the session directory
    pub source_file: String,
    /// argv executed inside the container
    pub command: Vec<String>,
}

/// Lookup table from language to profile, built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineRegistry {
    profiles: HashMap<Language, LanguageProfile>,
}

impl PipelineRegistry {
    pub fn new(images: &ImagesConfig) -> Self {
        let profiles = Language::ALL
            .into_iter()
            .map(|lang| (lang, LanguageProfile::new(lang, images)))
            .collect();
        Self { profiles }
    }

    pub fn profile(&self, language: Language) -> Option<&LanguageProfile> {
        self.profiles.get(&language)
    }

    /// Images for every registered language, in a stable order.
    pub fn images(&self) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        for profile in Language::ALL.iter().filter_map(|lang| self.profiles.get(lang)) {
            if !images.contains(&profile.image) {
                images.push(profile.image.clone());
            }
        }
        images
    }

    /// Render the pipeline for `code` in the given session.
    ///
    /// Compiled languages chain build and run in a single `sh -c` so that
    /// compiler diagnostics land on the same stderr as runtime errors.
    pub fn resolve(&self, language: Language, code: &str, session_id: &str) -> Option<Pipeline> {
        let profile = self.profile(language)?;
        let stem = profile.source_stem(code, session_id);
        let source_file = format!("{}.{}", stem, profile.extension);
        let source = format!("{}/{}", GUEST_SOURCE_DIR, source_file);

        let render = |template: &str| {
            template
                .replace("{source}", &source)
                .replace("{stem}", &stem)
                .replace("{build}", GUEST_BUILD_DIR)
        };

        let command = match profile.build {
            Some(build) => vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    "mkdir -p {} && {} && {}",
                    GUEST_BUILD_DIR,
                    render(build),
                    render(profile.run)
                ),
            ],
            None => render(profile.run)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        };

        Some(Pipeline {
            language,
            image: profile.image.clone(),
            source_file,
            command,
        })
    }
}

/// First `public class <Name>` in the source, or `Main`.
pub fn extract_java_class_name(code: &str) -> &str {
    JAVA_CLASS_REGEX
        .captures(code)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_JAVA_CLASS)
}
