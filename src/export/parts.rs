//! Extract every leaf part of a message into a directory.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::walk::{leaf_name, Visit, Walker};

/// Walk `reader` and write each leaf body to `output_dir`.
///
/// Files are named after the part's filename or its synthesized
/// `{level}.{seq}{ext}` name, sanitized and made unique within the
/// directory. `progress` is called with the running count and each path.
pub fn extract_parts<R: Read>(
    walker: &Walker,
    reader: R,
    output_dir: &Path,
    max_name_len: usize,
    progress: &dyn Fn(usize, &Path),
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let mut paths = Vec::new();

    walker.walk(reader, |part| {
        let filename = sanitize_filename_part(&leaf_name(&part), max_name_len);
        let path = unique_path(&output_dir.join(filename));
        let mut file =
            File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        io::copy(&mut part.body_reader(), &mut file)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(path = %path.display(), seq = part.seq(), "Extracted part");
        progress(paths.len() + 1, &path);
        paths.push(path);
        Ok(Visit::Continue)
    })?;

    Ok(paths)
}

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_`, drops leading dots and truncates
/// to `max_len`.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .trim_start_matches('.')
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

/// If `path` already exists, append a counter to make it unique.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    (1..)
        .map(|i| {
            if ext.is_empty() {
                parent.join(format!("{stem}_{i}"))
            } else {
                parent.join(format!("{stem}_{i}.{ext}"))
            }
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename_part("hello world", 20), "hello_world");
        assert_eq!(sanitize_filename_part("résumé.pdf", 20), "résumé.pdf");
        assert_eq!(sanitize_filename_part("a%2Fb\\c:d*e", 20), "a_2Fb_c_d_e");
        assert_eq!(sanitize_filename_part("..", 20), "unknown");
        assert_eq!(sanitize_filename_part(".hidden", 20), "hidden");
        assert_eq!(sanitize_filename_part("", 20), "unknown");
    }

    #[test]
    fn test_unique_path() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.txt");
        assert_eq!(unique_path(&first), first);
        std::fs::write(&first, b"x").unwrap();
        assert_eq!(unique_path(&first), dir.path().join("a_1.txt"));
        std::fs::write(dir.path().join("a_1.txt"), b"x").unwrap();
        assert_eq!(unique_path(&first), dir.path().join("a_2.txt"));
    }

    #[test]
    fn test_extract_writes_decoded_bodies() {
        let message = b"Content-Type: multipart/mixed; boundary=x\n\n\
--x\n\
Content-Type: text/plain\n\nfirst\n\
--x\n\
Content-Disposition: attachment; filename=\"a.txt\"\n\
Content-Transfer-Encoding: base64\n\nc2Vjb25k\n\
--x\n\
Content-Disposition: attachment; filename=\"a.txt\"\n\nthird\n\
--x--\n";
        let dir = tempfile::tempdir().unwrap();
        let reported = std::cell::RefCell::new(Vec::new());
        let paths = extract_parts(&Walker::new(), &message[..], dir.path(), 100, &|count, path| {
            reported.borrow_mut().push((count, path.to_path_buf()));
        })
        .unwrap();
        assert_eq!(paths.len(), 3);
        let expected: Vec<(usize, PathBuf)> =
            paths.iter().cloned().enumerate().map(|(i, p)| (i + 1, p)).collect();
        assert_eq!(reported.into_inner(), expected);
        assert!(paths[0].file_name().unwrap().to_str().unwrap().ends_with(".txt"));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"first");
        assert_eq!(paths[1], dir.path().join("a.txt"));
        assert_eq!(std::fs::read(&paths[1]).unwrap(), b"second");
        assert_eq!(paths[2], dir.path().join("a_1.txt"));
    }
}
