//! Deterministic names for derived artifacts.
//!
//! Proxy and clip files are keyed purely by their inputs: the same source
//! basename and parameters always map to the same name, and distinct inputs
//! never share one. A name that already needed no sanitizing is used as-is;
//! anything that had to be rewritten carries a short digest of the original
//! basename so two different sources can't collapse onto one artifact.

use crate::timecode::Timecode;
use sha2::{Digest, Sha256};
use std::path::Path;

const MAX_STEM_LEN: usize = 120;
const PROXY_PREFIX: &str = "proxy_360p_";

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// True for a single path component made only of `[A-Za-z0-9._-]` that
/// can't be mistaken for a hidden file or a directory reference.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && name.chars().all(is_safe_char)
}

/// Rewrite an arbitrary user-supplied name into a safe single component.
///
/// Any directory part is dropped. Never returns an empty string.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mut out: String = last
        .chars()
        .map(|c| if is_safe_char(c) { c } else { '_' })
        .collect();
    if out.starts_with('.') {
        out.replace_range(0..1, "_");
    }
    if out.len() > 255 {
        out.truncate(255);
    }
    if out.trim_matches('_').is_empty() {
        return "video".to_string();
    }
    out
}

fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..4])
}

fn artifact_base(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if name.ends_with(".mp4") && name.len() <= MAX_STEM_LEN && is_safe_file_name(&name) {
        return name;
    }

    let stem = name.strip_suffix(".mp4").unwrap_or(&name);
    let mut clean = sanitize_file_name(stem);
    if clean.len() > MAX_STEM_LEN {
        clean.truncate(MAX_STEM_LEN);
    }
    format!("{}-{}.mp4", clean, short_digest(&name))
}

/// File name of the analysis proxy for `source`.
pub fn proxy_file_name(source: &Path) -> String {
    format!("{}{}", PROXY_PREFIX, artifact_base(source))
}

/// File name of the `[start, end)` clip cut from `source`.
pub fn clip_file_name(source: &Path, start: Timecode, end: Timecode) -> String {
    format!(
        "clip_{}_{}_{}",
        start.file_safe(),
        end.file_safe(),
        artifact_base(source)
    )
}

/// Vector collection holding one project's segments.
pub fn collection_name(project_id: &str) -> String {
    format!("project_{}", project_id.replace('-', ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn tc(s: &str) -> Timecode {
        Timecode::parse(s).unwrap()
    }

    #[test]
    fn safe_mp4_names_are_kept() {
        let src = PathBuf::from("/data/media/Big_Buck_Bunny.mp4");
        assert_eq!(proxy_file_name(&src), "proxy_360p_Big_Buck_Bunny.mp4");
        assert_eq!(
            clip_file_name(&src, tc("00:10"), tc("01:02:03")),
            "clip_00-00-10_01-02-03_Big_Buck_Bunny.mp4"
        );
    }

    #[test]
    fn equivalent_timecodes_share_a_clip() {
        let src = PathBuf::from("talk.mp4");
        assert_eq!(
            clip_file_name(&src, tc("90"), tc("2:00")),
            clip_file_name(&src, tc("00:01:30"), tc("00:02:00"))
        );
    }

    #[test]
    fn distinct_inputs_never_collide() {
        let sources = [
            "a b.mp4", "a_b.mp4", "a?b.mp4", "clip.webm", "clip.mov", "clip.mp4", "clip",
        ];
        let ranges = [("0", "5"), ("0", "6"), ("1", "5")];

        let mut seen = HashSet::new();
        for s in sources {
            for (start, end) in ranges {
                let name = clip_file_name(Path::new(s), tc(start), tc(end));
                assert!(seen.insert(name.clone()), "duplicate {name}");
                assert!(is_safe_file_name(&name));
            }
            assert!(seen.insert(proxy_file_name(Path::new(s))));
        }
    }

    #[test]
    fn identical_inputs_never_diverge() {
        let src = PathBuf::from("/x/Ünïcode title!.mkv");
        assert_eq!(proxy_file_name(&src), proxy_file_name(&src));
        assert_eq!(
            clip_file_name(&src, tc("1"), tc("2")),
            clip_file_name(&src, tc("1"), tc("2"))
        );
        assert!(is_safe_file_name(&proxy_file_name(&src)));
    }

    #[test]
    fn sanitize_strips_directories_and_hidden_prefix() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\videos\\my clip.mp4"), "my_clip.mp4");
        assert_eq!(sanitize_file_name(".hidden.mp4"), "_hidden.mp4");
        assert_eq!(sanitize_file_name("///"), "video");
    }

    #[test]
    fn safe_name_check() {
        assert!(is_safe_file_name("clip_00-00-01_00-00-02_a.mp4"));
        assert!(!is_safe_file_name("../a.mp4"));
        assert!(!is_safe_file_name(".a.mp4"));
        assert!(!is_safe_file_name("a/b.mp4"));
        assert!(!is_safe_file_name(""));
    }

    #[test]
    fn collection_name_drops_dashes() {
        assert_eq!(
            collection_name("0f8fad5b-d9cb-469f-a165-70867728950e"),
            "project_0f8fad5bd9cb469fa16570867728950e"
        );
    }
}
