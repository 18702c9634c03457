//! 序列库
//!
//! 内存中维护一个有序的组列表（每组是一段连续的 [`Step`]），并负责：
//! - 设备录制（`SEQUENCE_START` 清空 → 逐步追加 → `SEQUENCE_END` 持久化）
//! - 客户端保存（整段追加为一组后持久化）
//! - 导出为文本文件（组内一行一步，组间空行）
//!
//! 所有修改和持久化都在同一把锁内完成，文件内容与某个时刻的内存状态一致。
//! 持久化失败不会回滚内存状态。

use crate::error::DriverError;
use parking_lot::Mutex;
use servo_protocol::{Group, Step, encode_sequence_text};
use smallvec::smallvec;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 序列库文件名
pub const STORE_FILE_NAME: &str = "sequences.json";
/// 导出文本文件名
pub const EXPORT_FILE_NAME: &str = "sequences.txt";
/// 导入暂存文件名
pub const IMPORT_FILE_NAME: &str = "movimientos_importados.txt";

/// 序列库相关的文件路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    /// 序列库 JSON 文件
    pub store_file: PathBuf,
    /// 导出的文本文件
    pub export_file: PathBuf,
    /// 导入文本的暂存文件
    pub import_file: PathBuf,
}

impl StorePaths {
    /// 在指定目录下使用默认文件名
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            store_file: dir.join(STORE_FILE_NAME),
            export_file: dir.join(EXPORT_FILE_NAME),
            import_file: dir.join(IMPORT_FILE_NAME),
        }
    }
}

impl Default for StorePaths {
    fn default() -> Self {
        Self::in_dir(".")
    }
}

/// 序列库
#[derive(Debug)]
pub struct SequenceStore {
    groups: Mutex<Vec<Group>>,
    paths: StorePaths,
}

impl SequenceStore {
    /// 创建空的序列库（不读取磁盘）
    pub fn new(paths: StorePaths) -> Self {
        Self {
            groups: Mutex::new(Vec::new()),
            paths,
        }
    }

    /// 从序列库文件恢复
    ///
    /// 文件不存在时返回空库。
    pub fn load(paths: StorePaths) -> Result<Self, DriverError> {
        let groups = match fs::read_to_string(&paths.store_file) {
            Ok(content) => serde_json::from_str::<Vec<Group>>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No store file at {}, starting empty", paths.store_file.display());
                Vec::new()
            },
            Err(e) => return Err(DriverError::storage(&paths.store_file, e)),
        };

        info!(
            "Restored {} groups from {}",
            groups.len(),
            paths.store_file.display()
        );
        Ok(Self {
            groups: Mutex::new(groups),
            paths,
        })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// 设备开始录制：清空序列库
    pub fn begin_capture(&self) {
        self.groups.lock().clear();
    }

    /// 追加一个设备上报的步骤，作为一个新的单步组
    ///
    /// 每个录制步骤单独成组，回放时逐步按各自速度延时。
    pub fn append_captured_step(&self, step: Step) {
        self.groups.lock().push(smallvec![step]);
    }

    /// 设备结束录制：持久化
    pub fn end_capture(&self) -> Result<PathBuf, DriverError> {
        let groups = self.groups.lock();
        self.persist_locked(&groups)
    }

    /// 客户端保存：把整段序列作为一个新组追加并持久化
    ///
    /// 返回持久化文件路径；空序列被拒绝，序列库不变。
    pub fn record_sequence(&self, group: Group) -> Result<PathBuf, DriverError> {
        if group.is_empty() {
            return Err(DriverError::InvalidInput(
                "sequence contains no valid steps".to_string(),
            ));
        }

        let mut groups = self.groups.lock();
        groups.push(group);
        self.persist_locked(&groups)
    }

    /// 当前序列库的快照
    pub fn snapshot(&self) -> Vec<Group> {
        self.groups.lock().clone()
    }

    /// 组数量
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }

    /// 导出为文本文件，返回文件路径
    pub fn export_text(&self) -> Result<PathBuf, DriverError> {
        let text = encode_sequence_text(&self.groups.lock());
        let path = &self.paths.export_file;
        fs::write(path, text).map_err(|e| DriverError::storage(path, e))?;
        info!("Exported sequences to {}", path.display());
        Ok(path.clone())
    }

    fn persist_locked(&self, groups: &[Group]) -> Result<PathBuf, DriverError> {
        let json = serde_json::to_string_pretty(groups)?;
        let path = &self.paths.store_file;
        fs::write(path, json).map_err(|e| DriverError::storage(path, e))?;
        info!("Saved {} groups to {}", groups.len(), path.display());
        Ok(path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_protocol::decode_flat_sequence;
    use tempfile::tempdir;

    fn group(steps: &[(i32, i32, i32)]) -> Group {
        steps.iter().map(|&(s, a, sp)| Step::new(s, a, sp)).collect()
    }

    #[test]
    fn test_store_paths_in_dir() {
        let paths = StorePaths::in_dir("/data");
        assert_eq!(paths.store_file, PathBuf::from("/data/sequences.json"));
        assert_eq!(paths.export_file, PathBuf::from("/data/sequences.txt"));
        assert_eq!(
            paths.import_file,
            PathBuf::from("/data/movimientos_importados.txt")
        );
    }

    #[test]
    fn test_capture_replaces_store() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::new(StorePaths::in_dir(dir.path()));

        store.record_sequence(group(&[(6, 10, 1)])).unwrap();
        assert_eq!(store.len(), 1);

        store.begin_capture();
        store.append_captured_step(Step::new(1, 30, 5));
        store.append_captured_step(Step::new(2, 60, 10));
        let path = store.end_capture().unwrap();

        assert_eq!(
            store.snapshot(),
            vec![group(&[(1, 30, 5)]), group(&[(2, 60, 10)])]
        );

        let on_disk: Vec<Group> =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(on_disk, store.snapshot());
    }

    #[test]
    fn test_empty_capture_persists_empty_store() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::new(StorePaths::in_dir(dir.path()));

        store.begin_capture();
        let path = store.end_capture().unwrap();

        assert!(store.is_empty());
        assert_eq!(fs::read_to_string(path).unwrap(), "[]");
    }

    #[test]
    fn test_step_without_start_keeps_saved_groups() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::new(StorePaths::in_dir(dir.path()));

        store.record_sequence(group(&[(6, 10, 1)])).unwrap();
        store.append_captured_step(Step::new(1, 30, 5));
        store.append_captured_step(Step::new(3, 45, 2));

        // 已保存的组不被修改，录制步骤各自成组
        assert_eq!(
            store.snapshot(),
            vec![group(&[(6, 10, 1)]), group(&[(1, 30, 5)]), group(&[(3, 45, 2)])]
        );
    }

    #[test]
    fn test_record_sequence_appends_group() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::new(StorePaths::in_dir(dir.path()));

        store.record_sequence(group(&[(1, 30, 5)])).unwrap();
        store
            .record_sequence(group(&[(2, 60, 10), (3, 90, 1)]))
            .unwrap();

        let groups = store.snapshot();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].len(), 2);

        // 文件为带缩进的 JSON
        let content = fs::read_to_string(&store.paths().store_file).unwrap();
        assert!(content.contains("\n  "), "{}", content);
        assert!(content.contains("\"servo\": 2"), "{}", content);
    }

    #[test]
    fn test_record_empty_sequence_rejected() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::new(StorePaths::in_dir(dir.path()));

        assert!(matches!(
            store.record_sequence(Group::new()),
            Err(DriverError::InvalidInput(_))
        ));
        assert!(store.is_empty());
        assert!(!store.paths().store_file.exists());
    }

    #[test]
    fn test_storage_failure_keeps_memory() {
        let dir = tempdir().unwrap();
        // 目录不存在，写入必然失败
        let store = SequenceStore::new(StorePaths::in_dir(dir.path().join("missing")));

        let err = store.record_sequence(group(&[(1, 30, 5)])).unwrap_err();
        assert!(matches!(err, DriverError::Storage { .. }), "{:?}", err);

        // 内存状态保持有效
        assert_eq!(store.snapshot(), vec![group(&[(1, 30, 5)])]);
        store.record_sequence(smallvec![Step::new(2, 60, 10)]).unwrap_err();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_export_then_import_round_trip() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::new(StorePaths::in_dir(dir.path()));
        store.record_sequence(group(&[(1, 30, 5), (2, 60, 10)])).unwrap();
        store.record_sequence(group(&[(3, 90, 1)])).unwrap();

        let path = store.export_text().unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text, "1,30,5\n2,60,10\n\n3,90,1");

        let flat: Vec<Step> = store.snapshot().into_iter().flatten().collect();
        let imported: Vec<Step> = decode_flat_sequence(&text).into_iter().flatten().collect();
        assert_eq!(imported, flat);
    }

    #[test]
    fn test_export_empty_store() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::new(StorePaths::in_dir(dir.path()));
        let path = store.export_text().unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "");
    }

    #[test]
    fn test_load_restores_saved_store() {
        let dir = tempdir().unwrap();
        let paths = StorePaths::in_dir(dir.path());

        let store = SequenceStore::new(paths.clone());
        store.record_sequence(group(&[(1, 30, 5)])).unwrap();

        let restored = SequenceStore::load(paths).unwrap();
        assert_eq!(restored.snapshot(), store.snapshot());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = SequenceStore::load(StorePaths::in_dir(dir.path())).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempdir().unwrap();
        let paths = StorePaths::in_dir(dir.path());
        fs::write(&paths.store_file, "not json").unwrap();

        assert!(matches!(
            SequenceStore::load(paths),
            Err(DriverError::Serialize(_))
        ));
    }
}
