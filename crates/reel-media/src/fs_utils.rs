//! Moving finished artifacts out of a workspace.

use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// EXDEV on Linux and macOS.
const CROSS_DEVICE_LINK: i32 = 18;

/// Move `src` to `dst`, creating the destination directory.
///
/// Work and output directories may live on different filesystems, in which
/// case `rename` fails with EXDEV and the file is copied next to `dst`
/// under a temporary name, then renamed into place.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.exists() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_LINK) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device move, copying"
            );
            copy_across_devices(src, dst).await
        }
        Err(e) => Err(e.into()),
    }
}

async fn copy_across_devices(src: &Path, dst: &Path) -> MediaResult<()> {
    let staging = dst.with_extension("partial");

    if let Err(e) = fs::copy(src, &staging).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&staging, dst).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }

    match fs::remove_file(src).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(src = %src.display(), error = %e, "Failed to remove moved source"),
    }
    Ok(())
}
