// HLS Assembler: joins decrypted segment files, in index order, into the output file.

use crate::hls::HlsDownloaderError;
use crate::hls::config::{AssemblyMode, HlsOutputConfig};
use crate::hls::segment::{SegmentResult, SegmentStatus};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tracing::{debug, info, warn};

const CONCAT_LIST_NAME: &str = "concat.list";

fn assembly_error(context: &str, path: &Path, e: impl std::fmt::Display) -> HlsDownloaderError {
    HlsDownloaderError::AssemblyError(format!("{context} {}: {e}", path.display()))
}

/// Every index `0..N` must be Decrypted with a readable file.
async fn verified_inputs(results: &[SegmentResult]) -> Result<Vec<PathBuf>, HlsDownloaderError> {
    if results.is_empty() {
        return Err(HlsDownloaderError::AssemblyError(
            "No segments to assemble".to_string(),
        ));
    }

    let mut inputs = Vec::with_capacity(results.len());
    for (position, result) in results.iter().enumerate() {
        let path = match (&result.path, result.status, result.index == position) {
            (Some(path), SegmentStatus::Decrypted, true) => path,
            _ => {
                return Err(HlsDownloaderError::AssemblyError(format!(
                    "Segment {position} is not available (status {})",
                    result.status
                )));
            }
        };
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| assembly_error("Segment file unreadable", path, e))?;
        if !metadata.is_file() {
            return Err(HlsDownloaderError::AssemblyError(format!(
                "Segment {position} path {} is not a file",
                path.display()
            )));
        }
        inputs.push(path.clone());
    }
    Ok(inputs)
}

/// ffmpeg arguments for a stream-copy remux of a concat list.
pub fn remux_args(list_path: &Path, target: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(list_path.as_os_str().to_owned());
    args.extend(["-c", "copy"].iter().map(OsString::from));

    let mp4_family = target
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "mp4" | "m4v" | "mov"));
    if mp4_family {
        // ADTS AAC from transport streams must be repacked for ISO-BMFF.
        args.extend(["-bsf:a", "aac_adtstoasc"].iter().map(OsString::from));
    }
    args.push(target.as_os_str().to_owned());
    args
}

fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", p.display().to_string().replace('\'', "'\\''")))
        .collect()
}

pub struct Assembler {
    mode: AssemblyMode,
}

impl Assembler {
    pub fn new(config: &HlsOutputConfig) -> Self {
        Self {
            mode: config.assembly_mode.clone(),
        }
    }

    async fn concat(&self, inputs: &[PathBuf], target: &Path) -> Result<(), HlsDownloaderError> {
        let file = File::create(target)
            .await
            .map_err(|e| assembly_error("Cannot create", target, e))?;
        let mut writer = BufWriter::new(file);
        for input in inputs {
            let mut reader = File::open(input)
                .await
                .map_err(|e| assembly_error("Cannot open", input, e))?;
            tokio::io::copy(&mut reader, &mut writer)
                .await
                .map_err(|e| assembly_error("Cannot write", target, e))?;
        }
        writer
            .flush()
            .await
            .map_err(|e| assembly_error("Cannot flush", target, e))?;
        Ok(())
    }

    async fn remux(
        &self,
        ffmpeg: &Path,
        inputs: &[PathBuf],
        work_dir: &Path,
        target: &Path,
    ) -> Result<(), HlsDownloaderError> {
        let list_path = work_dir.join(CONCAT_LIST_NAME);
        tokio::fs::write(&list_path, concat_list(inputs))
            .await
            .map_err(|e| assembly_error("Cannot write concat list", &list_path, e))?;

        debug!(ffmpeg = %ffmpeg.display(), target = %target.display(), "Running ffmpeg remux");
        let output = Command::new(ffmpeg)
            .args(remux_args(&list_path, target))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| assembly_error("Cannot run", ffmpeg, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HlsDownloaderError::AssemblyError(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn remove_inputs(results: &[SegmentResult]) {
        for path in results.iter().filter_map(|r| r.path.as_ref()) {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove segment file");
                }
            }
        }
    }

    async fn write_staged(
        &self,
        results: &[SegmentResult],
        work_dir: &Path,
        staged: &Path,
    ) -> Result<(), HlsDownloaderError> {
        let inputs = verified_inputs(results).await?;
        match &self.mode {
            AssemblyMode::Concat => self.concat(&inputs, staged).await,
            AssemblyMode::Remux { ffmpeg } => self.remux(ffmpeg, &inputs, work_dir, staged).await,
        }
    }

    async fn publish(staged: &Path, output_path: &Path) -> Result<(), HlsDownloaderError> {
        if tokio::fs::rename(staged, output_path).await.is_ok() {
            return Ok(());
        }
        // Work dir on another filesystem.
        Self::copy_into_place(staged, output_path).await?;
        let _ = tokio::fs::remove_file(staged).await;
        Ok(())
    }

    /// Copies `staged` to a hidden sibling of `output_path` and renames it over
    /// the target. The sibling is removed if any step fails.
    async fn copy_into_place(staged: &Path, output_path: &Path) -> Result<(), HlsDownloaderError> {
        let parent = output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let sibling = tempfile::Builder::new()
            .prefix(".pahe-publish-")
            .tempfile_in(parent)
            .map_err(|e| assembly_error("Cannot create temporary file in", parent, e))?
            .into_temp_path();

        tokio::fs::copy(staged, &sibling)
            .await
            .map_err(|e| assembly_error("Cannot copy assembled file to", output_path, e))?;
        sibling
            .persist(output_path)
            .map_err(|e| assembly_error("Cannot move assembled file to", output_path, e.error))?;
        debug!(output = %output_path.display(), "Published assembled file by copy");
        Ok(())
    }

    /// Assembles into `work_dir`, then moves the result onto `output_path`.
    /// Segment files are removed whatever the outcome. Returns the output size.
    pub async fn assemble(
        &self,
        results: &[SegmentResult],
        work_dir: &Path,
        output_path: &Path,
    ) -> Result<u64, HlsDownloaderError> {
        let extension = output_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("ts");
        let staged = work_dir.join(format!("assembled.{extension}"));

        let written = self.write_staged(results, work_dir, &staged).await;
        Self::remove_inputs(results).await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e);
        }

        Self::publish(&staged, output_path).await?;
        let size = tokio::fs::metadata(output_path)
            .await
            .map_err(|e| assembly_error("Cannot stat", output_path, e))?
            .len();
        info!(output = %output_path.display(), segments = results.len(), bytes = size, "Episode assembled");
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::segment::segment_file_name;

    fn write_segments(dir: &Path, payloads: &[&[u8]]) -> Vec<SegmentResult> {
        // Written in reverse to make sure directory order plays no part.
        let mut results: Vec<SegmentResult> = Vec::new();
        for (index, payload) in payloads.iter().enumerate().rev() {
            let path = dir.join(segment_file_name(index));
            std::fs::write(&path, payload).unwrap();
            results.push(SegmentResult {
                index,
                status: SegmentStatus::Decrypted,
                attempts: 1,
                path: Some(path),
                bytes: payload.len() as u64,
            });
        }
        results.reverse();
        results
    }

    #[tokio::test]
    async fn test_concat_in_index_order() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let results = write_segments(work.path(), &[b"AAA", b"BB", b"C", b"DDDD"]);
        let output_path = out.path().join("Show - 01.ts");

        let size = Assembler::new(&HlsOutputConfig::default())
            .assemble(&results, work.path(), &output_path)
            .await
            .unwrap();

        assert_eq!(size, 10);
        assert_eq!(std::fs::read(&output_path).unwrap(), b"AAABBCDDDD");
        for result in &results {
            assert!(!result.path.as_ref().unwrap().exists());
        }
        assert!(!work.path().join("assembled.ts").exists());
    }

    #[tokio::test]
    async fn test_missing_segment_file_fails_and_cleans_up() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let results = write_segments(work.path(), &[b"one", b"two", b"three"]);
        std::fs::remove_file(results[1].path.as_ref().unwrap()).unwrap();
        let output_path = out.path().join("episode.ts");

        let err = Assembler::new(&HlsOutputConfig::default())
            .assemble(&results, work.path(), &output_path)
            .await
            .unwrap_err();

        assert!(matches!(err, HlsDownloaderError::AssemblyError(_)));
        assert!(!output_path.exists());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_segment_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let mut results = write_segments(work.path(), &[b"one", b"two"]);
        results[1].status = SegmentStatus::Failed;
        let output_path = work.path().join("episode.ts");

        let err = Assembler::new(&HlsOutputConfig::default())
            .assemble(&results, work.path(), &output_path)
            .await
            .unwrap_err();
        assert!(matches!(err, HlsDownloaderError::AssemblyError(_)));
        assert!(!output_path.exists());
    }

    #[tokio::test]
    async fn test_index_gap_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let mut results = write_segments(work.path(), &[b"one", b"two", b"three"]);
        results.remove(1);
        let err = Assembler::new(&HlsOutputConfig::default())
            .assemble(&results, work.path(), &work.path().join("out.ts"))
            .await
            .unwrap_err();
        assert!(matches!(err, HlsDownloaderError::AssemblyError(_)));
    }

    #[tokio::test]
    async fn test_remux_with_missing_ffmpeg_fails() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let results = write_segments(work.path(), &[b"one"]);
        let output_path = out.path().join("episode.mp4");
        let config = HlsOutputConfig {
            assembly_mode: AssemblyMode::Remux {
                ffmpeg: work.path().join("no-such-ffmpeg"),
            },
            work_dir: None,
        };

        let err = Assembler::new(&config)
            .assemble(&results, work.path(), &output_path)
            .await
            .unwrap_err();
        assert!(matches!(err, HlsDownloaderError::AssemblyError(_)));
        assert!(!output_path.exists());
    }

    #[tokio::test]
    async fn test_copy_publish_replaces_target() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let staged = work.path().join("assembled.ts");
        std::fs::write(&staged, b"fresh episode").unwrap();
        let output_path = out.path().join("episode.ts");
        std::fs::write(&output_path, b"stale").unwrap();

        Assembler::copy_into_place(&staged, &output_path)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output_path).unwrap(), b"fresh episode");
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_failed_copy_publish_leaves_nothing_behind() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        // A directory is not a regular file, so the copy fails.
        let staged = work.path().join("assembled.ts");
        std::fs::create_dir(&staged).unwrap();
        let output_path = out.path().join("episode.ts");

        let err = Assembler::copy_into_place(&staged, &output_path)
            .await
            .unwrap_err();

        assert!(matches!(err, HlsDownloaderError::AssemblyError(_)));
        assert!(!output_path.exists());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remux_args() {
        let args = remux_args(Path::new("/tmp/w/concat.list"), Path::new("/out/ep.mp4"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
        assert!(args.windows(2).any(|w| w == ["-bsf:a", "aac_adtstoasc"]));
        assert_eq!(args.last().unwrap(), "/out/ep.mp4");

        let args = remux_args(Path::new("/tmp/w/concat.list"), Path::new("/out/ep.mkv"));
        assert!(!args.iter().any(|a| a == "-bsf:a"));
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/tmp/it's/segment_000000.ts")]);
        assert_eq!(list, "file '/tmp/it'\\''s/segment_000000.ts'\n");
    }
}
