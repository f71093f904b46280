use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The closed enumeration of loader file formats (`spec.md` §3). `Arrow` is
/// never produced by an extractor -- it is a write-side hint applied by
/// `load-storage` when passing parquet straight through -- so it has no
/// on-disk extension of its own here and `FromStr` never parses it back
/// from a filename.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderFileFormat {
    Jsonl,
    Parquet,
    Arrow,
}

impl LoaderFileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            LoaderFileFormat::Jsonl => "jsonl",
            LoaderFileFormat::Parquet => "parquet",
            LoaderFileFormat::Arrow => "arrow",
        }
    }
}

impl FromStr for LoaderFileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jsonl" => Ok(LoaderFileFormat::Jsonl),
            "parquet" => Ok(LoaderFileFormat::Parquet),
            other => Err(format!("unsupported loader file format `{other}`")),
        }
    }
}

impl std::fmt::Display for LoaderFileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}
