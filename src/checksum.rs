use std::fs;

use camino::Utf8Path;

use crate::error::EgaError;

/// Read a precomputed checksum for `filename` from a sidecar file.
///
/// The sidecar holds whitespace-delimited tokens in the `md5sum` style, one
/// file per line. The line whose filename token equals `filename` yields the
/// adjacent checksum token. The first matching line wins.
pub fn read_checksum(sidecar: &Utf8Path, filename: &str) -> Result<String, EgaError> {
    let content = fs::read_to_string(sidecar.as_std_path())
        .map_err(|err| EgaError::Filesystem(format!("read sidecar {sidecar}: {err}")))?;

    for line in content.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(position) = tokens.iter().position(|token| *token == filename) else {
            continue;
        };
        let checksum = tokens
            .iter()
            .enumerate()
            .find(|(i, _)| *i != position)
            .map(|(_, token)| token.to_string());
        if let Some(checksum) = checksum {
            return Ok(checksum);
        }
    }

    Err(EgaError::ChecksumNotFound {
        sidecar: sidecar.to_string(),
        filename: filename.to_string(),
    })
}
