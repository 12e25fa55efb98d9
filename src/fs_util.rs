use std::fs;
use std::io::Write;

use camino::Utf8Path;
use tracing::{info, warn};

use crate::error::MidfileError;

pub fn ensure_parent_dir(path: &Utf8Path) -> Result<(), MidfileError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MidfileError::Filesystem(format!("create {parent}: {err}")))?;
    }
    Ok(())
}

/// Writes `content` to a temp file beside `path`, then renames it into place.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), MidfileError> {
    ensure_parent_dir(path)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".midfile")
        .tempfile_in(dir.as_std_path())
        .map_err(|err| MidfileError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| MidfileError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| MidfileError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Renders a header and rows as tab-separated text.
pub fn render_tsv(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    push_line(&mut out, header.iter().copied());
    for row in rows {
        push_line(&mut out, row.iter().map(String::as_str));
    }
    out
}

pub fn write_tsv(path: &Utf8Path, header: &[&str], rows: &[Vec<String>]) -> Result<(), MidfileError> {
    write_atomic(path, render_tsv(header, rows).as_bytes())
}

fn push_line<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (idx, field) in fields.enumerate() {
        if idx > 0 {
            out.push('\t');
        }
        out.push_str(&quote_field(field));
    }
    out.push('\n');
}

fn quote_field(field: &str) -> String {
    if field.contains(['\t', '\n', '\r', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Opens up permissions on a shared catalog path so every operator can write.
/// Failures are logged and reported as `false`.
#[cfg(unix)]
pub fn set_shared_permissions(path: &Utf8Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match fs::set_permissions(path.as_std_path(), fs::Permissions::from_mode(0o777)) {
        Ok(()) => {
            info!(path = %path, "set permissions to 0777");
            true
        }
        Err(err) => {
            warn!(path = %path, error = %err, "failed to set permissions");
            false
        }
    }
}

#[cfg(not(unix))]
pub fn set_shared_permissions(path: &Utf8Path) -> bool {
    warn!(path = %path, "permission bits are not supported on this platform");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsv_quotes_only_special_fields() {
        let rows = vec![
            vec!["a".to_string(), "".to_string()],
            vec!["tab\there".to_string(), "say \"hi\"".to_string()],
        ];
        let tsv = render_tsv(&["x", "y"], &rows);
        assert_eq!(tsv, "x\ty\na\t\n\"tab\there\"\t\"say \"\"hi\"\"\"\n");
    }
}
