// src/packages/metadata.rs

//! Package metadata and README `key = value` extraction

use crate::error::{Error, Result};
use crate::packages::traits::payload_file_name;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use std::sync::LazyLock;

/// License shown when a package declares none
pub const DEFAULT_LICENSE: &str = "MIT";

/// Category used when a package declares none
pub const DEFAULT_CATEGORY: &str = "misc";

/// Metadata describing a package, as published in its README
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Where the package comes from (repository URL); empty for bundles
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// Optional payload file shipped next to the scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    /// Trust annotations attached during catalog refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<TrustAnnotation>,
}

/// Result of probing a package source for its trust file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnnotation {
    pub cert_type: String,
    pub cert_author: String,
    pub cert_valid: bool,
    pub cert_message: String,
}

struct ReadmePatterns {
    name: Regex,
    version: Regex,
    description: Regex,
    author: Regex,
    license: Regex,
    dependencies: Regex,
    category: Regex,
    main: Regex,
}

impl ReadmePatterns {
    fn compile() -> std::result::Result<Self, regex::Error> {
        let single = |key: &str| Regex::new(&format!(r"(?m)^[ \t]*{}[ \t]*=[ \t]*(\S+)", key));
        Ok(Self {
            name: single("name")?,
            version: single("ver")?,
            description: Regex::new(r"(?m)^[ \t]*des[ \t]*=[ \t]*(.+?)[ \t]*$")?,
            author: single("author")?,
            license: single("license")?,
            dependencies: Regex::new(r"(?m)^[ \t]*deps[ \t]*=[ \t]*\[?([^\]\n]*)\]?")?,
            category: single("category")?,
            main: single("main")?,
        })
    }
}

static PATTERNS: LazyLock<std::result::Result<ReadmePatterns, regex::Error>> =
    LazyLock::new(ReadmePatterns::compile);

fn patterns() -> Result<&'static ReadmePatterns> {
    PATTERNS
        .as_ref()
        .map_err(|e| Error::InvalidMetadata(format!("metadata pattern: {}", e)))
}

/// Reject names that could not serve as a single directory name
///
/// Package names become `installed/<name>`, so anything other than one
/// plain path component (separators, `.`, `..`, absolute paths) is refused.
pub fn validate_package_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidMetadata(format!("invalid package name '{}'", name)));
    }
    Ok(())
}

fn capture(re: &Regex, content: &str) -> Option<String> {
    re.captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

impl PackageMetadata {
    /// Create metadata with only the mandatory fields
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Extract metadata from README text
    ///
    /// Recognised keys: `name`, `ver`, `des`, `author`, `license`, `deps`,
    /// `category`, `main`. `name` and `ver` are mandatory.
    pub fn from_readme(content: &str) -> Result<Self> {
        let p = patterns()?;

        let name = capture(&p.name, content);
        let version = capture(&p.version, content);
        let (name, version) = match (name, version) {
            (Some(n), Some(v)) => (n, v),
            (None, Some(_)) => return Err(Error::InvalidMetadata("missing 'name'".to_string())),
            (Some(n), None) => {
                return Err(Error::InvalidMetadata(format!("missing 'ver' for {}", n)));
            }
            (None, None) => {
                return Err(Error::InvalidMetadata("missing 'name' and 'ver'".to_string()));
            }
        };

        validate_package_name(&name)?;

        let dependencies = capture(&p.dependencies, content)
            .map(|list| {
                list.split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let main = capture(&p.main, content);
        if let Some(main) = &main {
            payload_file_name(main)?;
        }

        Ok(Self {
            name,
            version,
            description: capture(&p.description, content),
            author: capture(&p.author, content),
            license: capture(&p.license, content),
            category: capture(&p.category, content),
            dependencies,
            source: String::new(),
            main,
            trust: None,
        })
    }

    pub fn license_or_default(&self) -> &str {
        self.license.as_deref().unwrap_or(DEFAULT_LICENSE)
    }

    pub fn category_or_default(&self) -> &str {
        self.category.as_deref().unwrap_or(DEFAULT_CATEGORY)
    }

    pub fn description_or_default(&self) -> &str {
        self.description.as_deref().unwrap_or("No description")
    }

    /// Case-insensitive match against name and description
    pub fn matches(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.name.to_lowercase().contains(&keyword)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&keyword))
    }
}
