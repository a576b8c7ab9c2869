use crate::BlockStore;
use async_trait::async_trait;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};
use volback_core::{Result, VolbackError};

/// Image locator as understood by the diff export/import tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub pool: String,
    pub name: String,
    pub snapshot: Option<String>,
    pub user: String,
    pub conf: Option<PathBuf>,
}

impl ImageSpec {
    pub fn new(pool: &str, name: &str, user: &str) -> Self {
        Self {
            pool: pool.to_string(),
            name: name.to_string(),
            snapshot: None,
            user: user.to_string(),
            conf: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: Option<&str>) -> Self {
        self.snapshot = snapshot.map(str::to_string);
        self
    }

    pub fn with_conf(mut self, conf: Option<PathBuf>) -> Self {
        self.conf = conf;
        self
    }

    /// `pool/name`
    pub fn path(&self) -> String {
        format!("{}/{}", self.pool, self.name)
    }

    /// `pool/name@snapshot`, or `pool/name` without a snapshot.
    pub fn snap_path(&self) -> String {
        match &self.snapshot {
            Some(snap) => format!("{}/{}@{}", self.pool, self.name, snap),
            None => self.path(),
        }
    }
}

/// Copies the extents that changed between `from_snap` (or image creation) and the
/// source snapshot into the destination image. The destination ends up sized like the
/// source and carries the source snapshot.
#[async_trait]
pub trait DiffTransfer: Send + Sync {
    async fn transfer(&self, src: &ImageSpec, dest: &ImageSpec, from_snap: Option<&str>)
    -> Result<()>;
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub code: Option<i32>,
    pub stderr: String,
    pub export_code: Option<i32>,
    pub export_stderr: String,
}

impl PipelineOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0) && self.export_code == Some(0)
    }
}

/// `rbd export-diff ... | rbd import-diff ...`
pub struct RbdDiffPipeline {
    rbd_binary: PathBuf,
}

impl RbdDiffPipeline {
    pub fn new(rbd_binary: impl Into<PathBuf>) -> Self {
        Self {
            rbd_binary: rbd_binary.into(),
        }
    }

    fn ceph_args(spec: &ImageSpec) -> Vec<String> {
        let mut args = vec!["--id".to_string(), spec.user.clone()];
        if let Some(conf) = &spec.conf {
            args.push("--conf".to_string());
            args.push(conf.to_string_lossy().into_owned());
        }
        args.push("--pool".to_string());
        args.push(spec.pool.clone());
        args
    }

    pub fn export_args(&self, src: &ImageSpec, from_snap: Option<&str>) -> Vec<String> {
        let mut cmd = vec![
            self.rbd_binary.to_string_lossy().into_owned(),
            "export-diff".to_string(),
        ];
        cmd.extend(Self::ceph_args(src));
        if let Some(from_snap) = from_snap {
            cmd.push("--from-snap".to_string());
            cmd.push(from_snap.to_string());
        }
        cmd.push(src.snap_path());
        cmd.push("-".to_string());
        cmd
    }

    pub fn import_args(&self, dest: &ImageSpec) -> Vec<String> {
        let mut cmd = vec![
            self.rbd_binary.to_string_lossy().into_owned(),
            "import-diff".to_string(),
        ];
        cmd.extend(Self::ceph_args(dest));
        cmd.push("-".to_string());
        cmd.push(dest.path());
        cmd
    }
}

#[async_trait]
impl DiffTransfer for RbdDiffPipeline {
    async fn transfer(
        &self,
        src: &ImageSpec,
        dest: &ImageSpec,
        from_snap: Option<&str>,
    ) -> Result<()> {
        let export = self.export_args(src, from_snap);
        let import = self.import_args(dest);
        debug!(
            "Piping cmd1='{}' into cmd2='{}'",
            export.join(" "),
            import.join(" ")
        );

        let output = tokio::task::spawn_blocking(move || piped_execute(&export, &import))
            .await
            .map_err(|e| VolbackError::StorageError(format!("Diff pipeline task failed: {e}")))??;

        if !output.success() {
            return Err(VolbackError::recoverable(
                "rbd diff transfer",
                format!(
                    "RBD diff op failed - (ret={:?} stderr={} export_ret={:?} export_stderr={})",
                    output.code,
                    output.stderr.trim(),
                    output.export_code,
                    output.export_stderr.trim()
                ),
            ));
        }
        Ok(())
    }
}

fn spawn(cmd: &[String], stdin: Stdio) -> Result<Child> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| VolbackError::InvalidParameter("Empty command".to_string()))?;
    // The Command owns `stdin`; dropping it on return closes the parent's copy.
    let child = Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    Ok(child)
}

#[cfg(unix)]
fn set_blocking(pipe: &std::process::ChildStdout) -> Result<()> {
    use nix::fcntl::{FcntlArg, OFlag, fcntl};
    use std::os::fd::AsRawFd;

    let fd = pipe.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(std::io::Error::from)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.remove(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(std::io::Error::from)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_blocking(_pipe: &std::process::ChildStdout) -> Result<()> {
    Ok(())
}

/// Runs `export_cmd | import_cmd` and waits for both. Blocks the calling thread.
pub fn piped_execute(export_cmd: &[String], import_cmd: &[String]) -> Result<PipelineOutput> {
    let mut exporter = spawn(export_cmd, Stdio::null())?;

    let export_stderr = exporter.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        })
    });

    let pipe = match exporter.stdout.take() {
        Some(pipe) => pipe,
        None => {
            reap(&mut exporter);
            return Err(VolbackError::StorageError(
                "Export process has no stdout".to_string(),
            ));
        }
    };
    if let Err(e) = set_blocking(&pipe) {
        reap(&mut exporter);
        return Err(e);
    }

    let importer = match spawn(import_cmd, Stdio::from(pipe)) {
        Ok(child) => child,
        Err(e) => {
            reap(&mut exporter);
            return Err(e);
        }
    };

    let output = importer.wait_with_output()?;
    let export_status = exporter.wait()?;
    let export_stderr = export_stderr
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default();

    Ok(PipelineOutput {
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        export_code: export_status.code(),
        export_stderr,
    })
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Failed to kill child process {}: {}", child.id(), e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap child process {}: {}", child.id(), e);
    }
}

/// Diff transfer carried out in process against a [`BlockStore`], for stores that
/// have no native export/import tool.
pub struct CopyDiffTransfer {
    store: Arc<dyn BlockStore>,
    chunk_size: usize,
    pending_failures: AtomicUsize,
}

impl CopyDiffTransfer {
    pub fn new(store: Arc<dyn BlockStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            pending_failures: AtomicUsize::new(0),
        }
    }

    /// Fault injection: the next `count` transfers fail as the external tool would.
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    async fn copy(&self, src: &ImageSpec, dest: &ImageSpec, from_snap: Option<&str>) -> Result<()> {
        let source = self
            .store
            .open(&src.pool, &src.name, src.snapshot.as_deref(), true)
            .await?;
        let target = self.store.open(&dest.pool, &dest.name, None, false).await?;

        if let Some(from_snap) = from_snap {
            if !source.list_snaps().await?.iter().any(|s| s.name == from_snap) {
                return Err(VolbackError::recoverable(
                    "diff export",
                    format!("start snapshot {from_snap} not found on {}", src.path()),
                ));
            }
            if !target.list_snaps().await?.iter().any(|s| s.name == from_snap) {
                return Err(VolbackError::recoverable(
                    "diff import",
                    format!("start snapshot {from_snap} not found on {}", dest.path()),
                ));
            }
        }
        if let Some(end_snap) = &src.snapshot {
            if target.list_snaps().await?.iter().any(|s| &s.name == end_snap) {
                return Err(VolbackError::recoverable(
                    "diff import",
                    format!("end snapshot {end_snap} already exists on {}", dest.path()),
                ));
            }
        }

        let size = source.size().await?;
        target.resize(size).await?;
        for extent in target.allocated_extents().await? {
            target.discard(extent.offset, extent.length).await?;
        }

        let mut copied = 0u64;
        for extent in source.allocated_extents().await? {
            let end = extent.offset + extent.length;
            let mut offset = extent.offset;
            while offset < end {
                let piece = (end - offset).min(self.chunk_size as u64) as usize;
                let data = source.read(offset, piece).await?;
                if data.is_empty() {
                    break;
                }
                target.write(&data, offset).await?;
                offset += data.len() as u64;
                copied += data.len() as u64;
                tokio::task::yield_now().await;
            }
        }
        target.flush().await?;

        if let Some(end_snap) = &src.snapshot {
            target.create_snap(end_snap).await?;
        }

        debug!(
            "Copied {} changed bytes from {} to {}",
            copied,
            src.snap_path(),
            dest.path()
        );
        Ok(())
    }
}

#[async_trait]
impl DiffTransfer for CopyDiffTransfer {
    async fn transfer(
        &self,
        src: &ImageSpec,
        dest: &ImageSpec,
        from_snap: Option<&str>,
    ) -> Result<()> {
        if self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(VolbackError::recoverable(
                "diff transfer",
                format!("injected failure copying {} to {}", src.snap_path(), dest.path()),
            ));
        }

        self.copy(src, dest, from_snap).await.map_err(|e| {
            if e.is_operation_failure() {
                e
            } else {
                VolbackError::recoverable(
                    "diff transfer",
                    format!("{} to {}: {}", src.snap_path(), dest.path(), e),
                )
            }
        })
    }
}
