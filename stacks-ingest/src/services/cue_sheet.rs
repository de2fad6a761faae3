//! Cue sheet checks
//!
//! A cue sheet is only useful next to the audio it indexes. The pipeline
//! leaves intact sheets where they are and quarantines sheets whose audio
//! is missing.

use std::path::Path;

/// File names referenced by `FILE` commands, in order
pub fn referenced_files(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix("FILE").or_else(|| line.strip_prefix("file"))?;
            if !rest.starts_with(char::is_whitespace) {
                return None;
            }
            parse_file_name(rest.trim_start())
        })
        .collect()
}

/// `"name with spaces.flac" WAVE` or `name.flac WAVE`
fn parse_file_name(rest: &str) -> Option<String> {
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        let name = &quoted[..end];
        return (!name.is_empty()).then(|| name.to_string());
    }

    // Unquoted: everything up to the trailing file type token
    let mut parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() > 1 {
        parts.pop();
    }
    let name = parts.join(" ");
    (!name.is_empty()).then_some(name)
}

/// Referenced files that do not exist next to the sheet.
///
/// References that try to leave the sheet's directory count as missing.
pub async fn missing_audio(cue_path: &Path) -> std::io::Result<Vec<String>> {
    let bytes = tokio::fs::read(cue_path).await?;
    let content = String::from_utf8_lossy(&bytes);
    let dir = cue_path.parent().unwrap_or_else(|| Path::new("."));

    let mut missing = Vec::new();
    for name in referenced_files(&content) {
        let normalized = name.replace('\\', "/");
        let escapes = normalized.split('/').any(|segment| segment == "..") || normalized.starts_with('/');
        if escapes || !tokio::fs::try_exists(dir.join(&normalized)).await.unwrap_or(false) {
            missing.push(name);
        }
    }
    Ok(missing)
}
