//! Locating the file a renderer produced somewhere below its workspace.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use tracing::warn;
use walkdir::WalkDir;

/// First regular file named exactly `file_name` anywhere under `root`.
pub async fn find_named(root: &Path, file_name: &str) -> Option<PathBuf> {
    let root = root.to_path_buf();
    let file_name = file_name.to_owned();
    run_blocking(move || {
        files_under(&root).find(|path| path.file_name() == Some(OsStr::new(&file_name)))
    })
    .await
}

/// Output of a tool told to write `<stem>.<ext>`.
///
/// Multi-page output is numbered, so `<stem>-0.<ext>` and then `<stem>-1.<ext>`
/// are accepted next; failing those, any file with the extension is used.
pub async fn find_output(root: &Path, stem: &str, ext: &str) -> Option<PathBuf> {
    let root = root.to_path_buf();
    let stem = stem.to_owned();
    let ext = ext.to_owned();
    run_blocking(move || locate_output(&root, &stem, &ext)).await
}

fn locate_output(root: &Path, stem: &str, ext: &str) -> Option<PathBuf> {
    let preferred = [
        format!("{stem}.{ext}"),
        format!("{stem}-0.{ext}"),
        format!("{stem}-1.{ext}"),
    ];
    let mut best: Option<(usize, PathBuf)> = None;
    let mut fallback = None;

    for path in files_under(root) {
        let Some(name) = path.file_name().and_then(OsStr::to_str) else {
            continue;
        };
        if let Some(rank) = preferred.iter().position(|candidate| candidate == name) {
            if rank == 0 {
                return Some(path);
            }
            if best.as_ref().is_none_or(|(current, _)| rank < *current) {
                best = Some((rank, path));
            }
            continue;
        }
        if fallback.is_none() && path.extension().is_some_and(|found| found == ext) {
            fallback = Some(path);
        }
    }

    best.map(|(_, path)| path).or(fallback)
}

fn files_under(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

async fn run_blocking<F>(search: F) -> Option<PathBuf>
where
    F: FnOnce() -> Option<PathBuf> + Send + 'static,
{
    match tokio::task::spawn_blocking(search).await {
        Ok(found) => found,
        Err(err) => {
            warn!(
                target = "application::render::artifact",
                error = %err,
                "Artifact search task did not complete"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dirs");
        }
        fs::write(path, b"artifact").expect("write file");
    }

    #[tokio::test]
    async fn finds_manim_output_in_nested_media_tree() {
        let dir = TempDir::new().expect("temp dir");
        touch(dir.path(), "scene.py");
        touch(dir.path(), "media/videos/scene/480p15/partial_movie_files/a.mp4");
        touch(dir.path(), "media/videos/scene/480p15/output.mp4");

        let found = find_named(dir.path(), "output.mp4").await.expect("found");
        assert!(found.ends_with("media/videos/scene/480p15/output.mp4"));
        assert!(find_named(dir.path(), "output.gif").await.is_none());
    }

    #[tokio::test]
    async fn exact_stem_wins_over_numbered_pages() {
        let dir = TempDir::new().expect("temp dir");
        touch(dir.path(), "out-0.svg");
        touch(dir.path(), "nested/out.svg");

        let found = find_output(dir.path(), "out", "svg").await.expect("found");
        assert!(found.ends_with("nested/out.svg"));
    }

    #[tokio::test]
    async fn first_page_wins_over_second() {
        let dir = TempDir::new().expect("temp dir");
        touch(dir.path(), "out-1.png");
        touch(dir.path(), "out-0.png");

        let found = find_output(dir.path(), "out", "png").await.expect("found");
        assert_eq!(found.file_name(), Some(OsStr::new("out-0.png")));
    }

    #[tokio::test]
    async fn falls_back_to_any_file_with_the_extension() {
        let dir = TempDir::new().expect("temp dir");
        touch(dir.path(), "scene.asy");
        touch(dir.path(), "scene_1.png");

        let found = find_output(dir.path(), "out", "png").await.expect("found");
        assert_eq!(found.file_name(), Some(OsStr::new("scene_1.png")));
        assert!(find_output(dir.path(), "out", "svg").await.is_none());
    }
}
