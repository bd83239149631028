//! Diff-engine failures.
//!
//! Every variant is a business failure: the job cannot complete and the
//! message is surfaced to the end user, so user-facing variants carry the
//! product's localized wording.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("读取文件{which}失败: {message}")]
    Read { which: u8, message: String },

    #[error("无法猜测主键列，请确保包含明显的编号列")]
    KeyColumnNotFound,

    #[error("Excel文件中必须同时包含“{0}”列")]
    KeyColumnMissing(String),

    #[error("文件{which}主键列“{key}”存在重复值（示例: {examples:?}），请先去重或修正后再比对")]
    DuplicateKeys {
        which: u8,
        key: String,
        examples: Vec<String>,
    },

    #[error("写入结果文件失败: {0}")]
    Write(String),

    #[error("表格转换失败: {0}")]
    Convert(String),

    #[error("表格转换超时（{0}s）")]
    ConvertTimeout(u64),
}
