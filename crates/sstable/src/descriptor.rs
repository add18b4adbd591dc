//! Table identity and component file naming.
//!
//! A table is a set of component files sharing one prefix:
//!
//! ```text
//! <dir>/<version>-<generation>-big-<Component>
//! e.g. data/nb-3-big-Data.db, data/nb-3-big-Index.db, data/nb-3-big-TOC.txt
//! ```
//!
//! While a table is being written every component carries a `tmp-` prefix.
//! The table is committed once `TOC.txt` exists under its final name.

use bloom::SerializationFormat;
use config::SSTableConfig;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SSTableError};

const FORMAT_NAME: &str = "big";
const TMP_PREFIX: &str = "tmp-";

/// On-disk format version of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    /// Older tables: filter written in the legacy encoding.
    Ma,
    /// Current tables.
    Nb,
}

impl Version {
    pub const CURRENT: Version = Version::Nb;

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Ma => "ma",
            Version::Nb => "nb",
        }
    }

    /// Encoding of the `Filter.db` component for this version.
    #[must_use]
    pub fn filter_format(&self) -> SerializationFormat {
        match self {
            Version::Ma => SerializationFormat::Legacy,
            Version::Nb => SerializationFormat::Current,
        }
    }
}

impl FromStr for Version {
    type Err = SSTableError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ma" => Ok(Version::Ma),
            "nb" => Ok(Version::Nb),
            other => Err(SSTableError::UnsupportedVersion(other.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The files that make up one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Data,
    PrimaryIndex,
    Filter,
    Statistics,
    Toc,
}

impl Component {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Component::Data => "Data.db",
            Component::PrimaryIndex => "Index.db",
            Component::Filter => "Filter.db",
            Component::Statistics => "Statistics.db",
            Component::Toc => "TOC.txt",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Data.db" => Some(Component::Data),
            "Index.db" => Some(Component::PrimaryIndex),
            "Filter.db" => Some(Component::Filter),
            "Statistics.db" => Some(Component::Statistics),
            "TOC.txt" => Some(Component::Toc),
            _ => None,
        }
    }
}

/// Identifies one table: directory, generation and format version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub directory: PathBuf,
    pub generation: u64,
    pub version: Version,
}

impl Descriptor {
    pub fn new(directory: impl Into<PathBuf>, generation: u64, version: Version) -> Self {
        Self {
            directory: directory.into(),
            generation,
            version,
        }
    }

    /// Descriptor for generation `generation` in the configured data
    /// directory, using the configured format version.
    pub fn from_config(config: &SSTableConfig, generation: u64) -> Result<Self> {
        let version = config.format_version.parse()?;
        Ok(Self::new(&config.data_dir, generation, version))
    }

    #[must_use]
    pub fn filename_for(&self, component: Component) -> String {
        format!(
            "{}-{}-{}-{}",
            self.version,
            self.generation,
            FORMAT_NAME,
            component.name()
        )
    }

    /// Final path of `component`.
    #[must_use]
    pub fn path_for(&self, component: Component) -> PathBuf {
        self.directory.join(self.filename_for(component))
    }

    /// Path of `component` while the table is still being written.
    #[must_use]
    pub fn tmp_path_for(&self, component: Component) -> PathBuf {
        self.directory
            .join(format!("{}{}", TMP_PREFIX, self.filename_for(component)))
    }

    /// `true` once the table's TOC is in place.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.path_for(Component::Toc).exists()
    }

    /// Parses a component file name such as `nb-3-big-Data.db`.
    ///
    /// Returns `None` for temporary files and anything else that is not a
    /// well-formed component name.
    pub fn from_filename(directory: &Path, name: &str) -> Option<(Descriptor, Component)> {
        if name.starts_with(TMP_PREFIX) {
            return None;
        }
        let mut parts = name.splitn(4, '-');
        let version: Version = parts.next()?.parse().ok()?;
        let generation: u64 = parts.next()?.parse().ok()?;
        if parts.next()? != FORMAT_NAME {
            return None;
        }
        let component = Component::from_name(parts.next()?)?;
        Some((Descriptor::new(directory, generation, version), component))
    }

    /// Every committed table in `directory`, oldest generation first.
    pub fn list_committed(directory: &Path) -> io::Result<Vec<Descriptor>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some((desc, Component::Toc)) =
                Descriptor::from_filename(directory, &name.to_string_lossy())
            {
                found.push(desc);
            }
        }
        found.sort_by_key(|d| d.generation);
        Ok(found)
    }

    /// One past the highest generation present in `directory`, committed or not.
    pub fn next_generation(directory: &Path) -> io::Result<u64> {
        let mut max = 0u64;
        for entry in fs::read_dir(directory)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            let name = name.strip_prefix(TMP_PREFIX).unwrap_or(&name);
            if let Some((desc, _)) = Descriptor::from_filename(directory, name) {
                max = max.max(desc.generation);
            }
        }
        Ok(max + 1)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}-{}-{}",
            self.directory.display(),
            self.version,
            self.generation,
            FORMAT_NAME
        )
    }
}
