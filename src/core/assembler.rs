use anyhow::Context;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Positional writer over `<target>.partial`; `commit` renames it onto the target.
pub struct Assembler {
    file: tokio::sync::Mutex<File>,
    partial_path: PathBuf,
}

impl Assembler {
    pub fn partial_path_for(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(".partial");
        PathBuf::from(name)
    }

    pub async fn create(target: &Path, total_size: Option<u64>) -> anyhow::Result<Self> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial_path = Self::partial_path_for(target);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&partial_path)
            .await
            .with_context(|| format!("open {:?}", partial_path))?;

        if let Some(sz) = total_size {
            // 预分配长度；部分文件系统不支持，失败可忽略
            file.set_len(sz).await.ok();
        }

        Ok(Self { file: tokio::sync::Mutex::new(file), partial_path })
    }

    pub async fn write_at(&self, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        let mut f = self.file.lock().await;
        f.seek(std::io::SeekFrom::Start(offset)).await?;
        f.write_all(data).await?;
        Ok(())
    }

    pub async fn commit(self, target: &Path) -> anyhow::Result<()> {
        let mut f = self.file.into_inner();
        f.flush().await?;
        f.sync_all().await.ok();
        drop(f);

        if tokio::fs::metadata(target).await.is_ok() {
            let _ = tokio::fs::remove_file(target).await;
        }
        tokio::fs::rename(&self.partial_path, target)
            .await
            .with_context(|| format!("rename {:?} -> {:?}", self.partial_path, target))?;
        Ok(())
    }

    pub async fn discard(self) {
        drop(self.file);
        let _ = tokio::fs::remove_file(&self.partial_path).await;
    }
}
