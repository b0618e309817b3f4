// Output stage: remux the downloaded MPEG-TS segments into MP4 with ffmpeg, or
// write them out as a single .ts file when ffmpeg is unavailable or fails.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use bytes::Bytes;
use hlsdl_engine::MemoryReader;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::AppError;

/// Append `.ext` to `output`, keeping any dots already in the name.
fn with_suffix(output: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Write `segments` to `<output>.mp4` through ffmpeg, falling back to `<output>.ts`.
pub async fn write_output(
    segments: Vec<Bytes>,
    output: &Path,
    remux: bool,
) -> Result<PathBuf, AppError> {
    if remux {
        let target = with_suffix(output, "mp4");
        info!(path = %target.display(), "Remuxing MPEG-TS to mp4 with ffmpeg");
        match run_ffmpeg(&segments, &target).await {
            Ok(()) => return Ok(target),
            Err(AppError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("ffmpeg not found (ENOENT)");
            }
            Err(e) => warn!(error = %e, "exec ffmpeg failed"),
        }
    }

    let target = with_suffix(output, "ts");
    info!(path = %target.display(), "Writing data to a single MPEG-TS file");
    write_ts(&segments, &target).await?;
    Ok(target)
}

async fn run_ffmpeg(segments: &[Bytes], target: &Path) -> Result<(), AppError> {
    let mut child = Command::new("ffmpeg")
        .args([
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-stats",
            "-i",
            "-",
            "-c",
            "copy",
            "-f",
            "mp4",
        ])
        .arg(target)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Remux("stdin not captured".to_string()))?;
    let mut reader = MemoryReader::new(segments.to_vec());
    let copied = tokio::io::copy(&mut reader, &mut stdin).await;
    // Closing stdin signals end of input.
    drop(stdin);

    let status = child.wait().await?;
    if !status.success() {
        return Err(AppError::Remux(format!("ffmpeg exited with {status}")));
    }
    copied?;
    Ok(())
}

async fn write_ts(segments: &[Bytes], target: &Path) -> Result<(), AppError> {
    let mut file = tokio::fs::File::create(target).await?;
    for segment in segments {
        file.write_all(segment).await?;
    }
    file.flush().await?;
    Ok(())
}
