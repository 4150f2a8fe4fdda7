use std::{fmt, str::FromStr};

const MIB: u64 = 1024 * 1024;

/// Named starting points for a [`FormatPolicy`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FormatProfile {
    /// 720p/480p ladder under a 50 MiB ceiling.
    #[default]
    Quality,
    /// 360p and worst-quality fallbacks under a 25 MiB ceiling.
    Compact,
}

impl FormatProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Compact => "compact",
        }
    }
}

impl fmt::Display for FormatProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProfile(pub String);

impl fmt::Display for UnknownProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown download profile {:?}, expected \"quality\" or \"compact\"",
            self.0
        )
    }
}

impl FromStr for FormatProfile {
    type Err = UnknownProfile;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "compact" | "small" => Ok(Self::Compact),
            _ => Err(UnknownProfile(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Size,
    Bitrate,
    Resolution,
}

impl SortField {
    fn token(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Bitrate => "br",
            Self::Resolution => "res",
        }
    }
}

/// One tie-break key. Ascending means the engine prefers the smaller value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub ascending: bool,
}

impl SortKey {
    pub const fn ascending(field: SortField) -> Self {
        Self {
            field,
            ascending: true,
        }
    }

    pub const fn descending(field: SortField) -> Self {
        Self {
            field,
            ascending: false,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.ascending { "+" } else { "" };
        write!(f, "{prefix}{}", self.field.token())
    }
}

const QUALITY_CHAIN: &[&str] = &[
    "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]",
    "bestvideo[height<=480][ext=mp4]+bestaudio[ext=m4a]",
    "best[height<=720]",
    "best[height<=480]",
    "best",
];

const COMPACT_CHAIN: &[&str] = &[
    "bestvideo[height<=360][ext=mp4]+bestaudio[ext=m4a]",
    "best[height<=360]",
    "worstvideo+worstaudio",
    "worst",
];

const SMALLEST_FIRST: [SortKey; 3] = [
    SortKey::ascending(SortField::Size),
    SortKey::ascending(SortField::Bitrate),
    SortKey::ascending(SortField::Resolution),
];

/// Everything the extraction engine needs to pick a rendition. This code never
/// evaluates the chain itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPolicy {
    /// Selector expressions, first satisfiable one wins.
    pub format_chain: Vec<String>,
    pub merge_container: String,
    pub size_ceiling_bytes: Option<u64>,
    pub sort_priority: Vec<SortKey>,
}

impl FormatPolicy {
    pub fn for_profile(profile: FormatProfile) -> Self {
        let (format_chain, ceiling_mib) = match profile {
            FormatProfile::Quality => (QUALITY_CHAIN, 50),
            FormatProfile::Compact => (COMPACT_CHAIN, 25),
        };

        Self {
            format_chain: format_chain.iter().map(ToString::to_string).collect(),
            merge_container: "mp4".to_string(),
            size_ceiling_bytes: Some(ceiling_mib * MIB),
            sort_priority: SMALLEST_FIRST.to_vec(),
        }
    }

    pub fn with_size_ceiling(mut self, bytes: Option<u64>) -> Self {
        if bytes.is_some() {
            self.size_ceiling_bytes = bytes;
        }
        self
    }

    /// The chain as a single `-f` selector.
    pub fn format_selector(&self) -> String {
        self.format_chain.join("/")
    }

    pub fn sort_selector(&self) -> String {
        self.sort_priority
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn content_type(&self) -> &'static str {
        content_type_for_extension(&self.merge_container)
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.format_selector(),
            "--merge-output-format".to_string(),
            self.merge_container.clone(),
        ];

        if !self.sort_priority.is_empty() {
            args.push("-S".to_string());
            args.push(self.sort_selector());
        }

        if let Some(ceiling) = self.size_ceiling_bytes {
            args.push("--max-filesize".to_string());
            args.push(ceiling.to_string());
        }

        args
    }
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self::for_profile(FormatProfile::default())
    }
}

pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "flv" => "video/x-flv",
        _ => "application/octet-stream",
    }
}
