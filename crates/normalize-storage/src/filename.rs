use crate::format::LoaderFileFormat;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// `<schema_name> "." <table_name> "." <file_format> "." <uniq_id> "." <ext>`
/// (`spec.md` §6). The filename is authoritative for routing; file content
/// is opaque until a normalizer opens it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtractedFileName {
    pub schema_name: String,
    pub table_name: String,
    pub file_format: LoaderFileFormat,
    pub uniq_id: String,
}

#[derive(thiserror::Error, Debug)]
#[error("malformed extracted file name `{0}`: expected <schema>.<table>.<format>.<uniq_id>.<ext>")]
pub struct MalformedName(pub String);

pub fn parse_normalize_file_name(path: &Path) -> Result<ExtractedFileName, MalformedName> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| MalformedName(path.display().to_string()))?;

    let parts: Vec<&str> = file_name.split('.').collect();
    if parts.len() != 5 {
        return Err(MalformedName(file_name.to_string()));
    }
    let [schema_name, table_name, format, uniq_id, _ext] = [parts[0], parts[1], parts[2], parts[3], parts[4]];
    if schema_name.is_empty() || table_name.is_empty() || uniq_id.is_empty() {
        return Err(MalformedName(file_name.to_string()));
    }
    let file_format = LoaderFileFormat::from_str(format).map_err(|_| MalformedName(file_name.to_string()))?;

    Ok(ExtractedFileName {
        schema_name: schema_name.to_string(),
        table_name: table_name.to_string(),
        file_format,
        uniq_id: uniq_id.to_string(),
    })
}

/// Inverse of [`parse_normalize_file_name`]; used by extractors (and by the
/// round-trip test in `spec.md` §8 invariant 6).
pub fn build_normalize_file_name(name: &ExtractedFileName) -> PathBuf {
    PathBuf::from(format!(
        "{}.{}.{}.{}.{}",
        name.schema_name,
        name.table_name,
        name.file_format,
        name.uniq_id,
        name.file_format.extension(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_with_build() {
        let original = ExtractedFileName {
            schema_name: "s".into(),
            table_name: "t".into(),
            file_format: LoaderFileFormat::Jsonl,
            uniq_id: "001".into(),
        };
        let built = build_normalize_file_name(&original);
        let parsed = parse_normalize_file_name(&built).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn malformed_name_is_rejected() {
        assert!(parse_normalize_file_name(Path::new("not_enough_parts.jsonl")).is_err());
        assert!(parse_normalize_file_name(Path::new("s.t.unknownformat.1.bin")).is_err());
    }
}
