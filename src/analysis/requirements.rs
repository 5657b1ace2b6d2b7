use regex::Regex;
use std::sync::LazyLock;

/// `pkg @ git+https://...`
static VCS_DEPENDENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\s+git").expect("valid regex"));

static OPENCV: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*opencv-python\b").expect("valid regex"));

/// System dependencies implied by a pip requirements manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestHints {
    pub needs_git: bool,
    pub needs_lib_gl: bool,
    pub needs_lib_glib: bool,
}

/// Scan every line; flags only ever get set, never cleared
pub fn scan(content: &str) -> ManifestHints {
    let mut hints = ManifestHints::default();

    for line in content.lines() {
        if VCS_DEPENDENCY.is_match(line) {
            hints.needs_git = true;
        }
        if OPENCV.is_match(line) {
            hints.needs_lib_gl = true;
            hints.needs_lib_glib = true;
        }
    }

    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        empty = { "", false, false },
        plain = { "flask==3.0\nrequests\n", false, false },
        vcs = { "pkg @ git+https://example.com/pkg.git", true, false },
        vcs_tabbed = { "pkg @\tgit+ssh://git@example.com/pkg.git", true, false },
        opencv = { "opencv-python==4.5", false, true },
        opencv_indented = { "  opencv-python>=4", false, true },
        opencv_headless = { "opencv-python-headless", false, true },
        opencv_not_at_start = { "# opencv-python", false, false },
        opencv_prefixed = { "my-opencv-python", false, false },
        both = { "opencv-python\nx @ git+https://h/x.git\n", true, true },
        no_space_before_git = { "pkg@git+https://h/x.git", false, false },
    )]
    fn test_scan(content: &str, git: bool, gl: bool) {
        let hints = scan(content);
        assert_eq!(hints.needs_git, git);
        assert_eq!(hints.needs_lib_gl, gl);
        assert_eq!(hints.needs_lib_glib, gl);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let content = "numpy\nopencv-python==4.5\npkg @ git+https://example.com/pkg.git\n";
        assert_eq!(scan(content), scan(content));
    }

    #[test]
    fn test_flags_accumulate_across_lines() {
        let hints = scan("a @ git+https://h/a.git\nnumpy\nb==1\n");
        assert!(hints.needs_git);
        assert!(!hints.needs_lib_gl);
    }
}
