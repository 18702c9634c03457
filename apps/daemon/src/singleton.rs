//! 单例文件锁
//!
//! 同一台机器上只允许一个守护进程打开舵机串口。

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// 默认锁文件名
pub const LOCK_FILE_NAME: &str = "servo_daemon.lock";

/// 默认锁文件路径：优先 XDG_RUNTIME_DIR，其次系统临时目录
pub fn default_lock_path() -> PathBuf {
    if let Some(runtime_dir) = dirs::runtime_dir()
        && (runtime_dir.exists() || std::fs::create_dir_all(&runtime_dir).is_ok())
    {
        return runtime_dir.join(LOCK_FILE_NAME);
    }

    std::env::temp_dir().join(LOCK_FILE_NAME)
}

/// 单例文件锁
///
/// 进程崩溃时锁由操作系统自动释放。
pub struct SingletonLock {
    file: File,
    path: PathBuf,
}

impl SingletonLock {
    /// 尝试获取单例锁（非阻塞）
    ///
    /// 锁已被其他进程持有时返回 `AlreadyExists`。
    pub fn try_lock(lock_path: impl AsRef<Path>) -> Result<Self, io::Error> {
        let path = lock_path.as_ref();

        // 拿到锁之前不能截断文件
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(path)?;

        if !file.try_lock_exclusive()? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "servo daemon is already running (locked)",
            ));
        }

        // 写入当前 PID
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(&file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
