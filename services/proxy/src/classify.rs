//! User-code vs adapter-code path classification.
//!
//! The whole point of the proxy is to hide the machinery that replays a
//! workflow: replayer adapters, the workflow SDK, language runtime
//! internals, vendored dependencies.  A frame is *user* code only when
//! its source file is an absolute path under the working directory and
//! carries none of the adapter markers.
//!
//! Purely functional; no I/O.

use std::path::Path;

/// Substrings that mark a path as adapter/framework code regardless of
/// where it lives.  Matching is case-sensitive.
pub const ADAPTER_MARKERS: &[&str] = &[
    // Replayer adapters embedded in the user process.
    "replayer-adapter-go/",
    "replayer-adapter-python/",
    "replayer-adapter-nodejs/",
    "replayer-adapter-java/",
    "replayer.go",
    "replayer.py",
    "replayer.ts",
    "outbound_interceptor.",
    "inbound_interceptor.",
    // Workflow SDK paths (module cache forms use `@version` suffixes).
    "go.temporal.io/sdk/",
    "go.temporal.io/sdk@",
    // Language runtime internals.
    "/runtime/",
    "/reflect/",
    // Build isolation.
    "vendor/",
    ".git/",
];

/// Whether a source file belongs to the user's workflow logic or to the
/// framework driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    User,
    Adapter,
}

/// Classify a source file path relative to the session's working
/// directory.  Empty paths classify as adapter.
pub fn classify(file_path: &str, working_dir: &Path) -> CodeKind {
    if file_path.is_empty() {
        return CodeKind::Adapter;
    }
    let path = Path::new(file_path);
    if !path.is_absolute() || !path.starts_with(working_dir) {
        return CodeKind::Adapter;
    }
    if ADAPTER_MARKERS.iter().any(|m| file_path.contains(m)) {
        return CodeKind::Adapter;
    }
    CodeKind::User
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workdir() -> &'static Path {
        Path::new("/home/dev/orders")
    }

    #[test]
    fn user_file_under_workdir_is_user() {
        assert_eq!(classify("/home/dev/orders/workflow.go", workdir()), CodeKind::User);
        assert_eq!(
            classify("/home/dev/orders/internal/handlers.go", workdir()),
            CodeKind::User
        );
    }

    #[test]
    fn file_outside_workdir_is_adapter() {
        assert_eq!(classify("/usr/lib/go/src/fmt/print.go", workdir()), CodeKind::Adapter);
        assert_eq!(classify("/home/dev/other/main.go", workdir()), CodeKind::Adapter);
    }

    #[test]
    fn relative_and_empty_paths_are_adapter() {
        assert_eq!(classify("main.go", workdir()), CodeKind::Adapter);
        assert_eq!(classify("", workdir()), CodeKind::Adapter);
    }

    #[test]
    fn sdk_paths_are_adapter_even_under_workdir() {
        assert_eq!(
            classify("/home/dev/orders/go.temporal.io/sdk/internal/worker.go", workdir()),
            CodeKind::Adapter
        );
        assert_eq!(
            classify(
                "/home/dev/orders/pkg/mod/go.temporal.io/sdk@v1.25.0/workflow.go",
                workdir()
            ),
            CodeKind::Adapter
        );
    }

    #[test]
    fn every_marker_forces_adapter() {
        for marker in ADAPTER_MARKERS {
            let path = format!("/home/dev/orders/{marker}x.go");
            assert_eq!(
                classify(&path, workdir()),
                CodeKind::Adapter,
                "marker {marker} should classify as adapter"
            );
        }
    }

    #[test]
    fn runtime_and_vendor_are_adapter() {
        assert_eq!(
            classify("/home/dev/orders/vendor/dep/lib.go", workdir()),
            CodeKind::Adapter
        );
        assert_eq!(
            classify("/home/dev/orders/x/runtime/proc.go", workdir()),
            CodeKind::Adapter
        );
        assert_eq!(
            classify("/home/dev/orders/x/reflect/value.go", workdir()),
            CodeKind::Adapter
        );
    }

    #[test]
    fn replayer_sources_are_adapter() {
        assert_eq!(
            classify("/home/dev/orders/replayer.go", workdir()),
            CodeKind::Adapter
        );
        assert_eq!(
            classify("/home/dev/orders/replayer-adapter-go/adapter.go", workdir()),
            CodeKind::Adapter
        );
        assert_eq!(
            classify("/home/dev/orders/outbound_interceptor.py", workdir()),
            CodeKind::Adapter
        );
    }
}
