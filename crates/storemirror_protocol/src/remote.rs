//! Remote item and change batch types.

use serde::{Deserialize, Serialize};

/// Content type the remote store reports for directories.
pub const REMOTE_FOLDER_TYPE: &str = "folder";

/// One remote file or directory as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Remote-issued numeric id.
    pub id: i64,
    /// File name.
    pub name: String,
    /// Remote content type; [`REMOTE_FOLDER_TYPE`] for directories.
    pub ctype: String,
    /// Byte length, or child count for directories.
    pub size: i64,
    /// Modification time, unix seconds.
    pub mdate: i64,
    /// Creation time, unix seconds.
    pub cdate: i64,
}

impl RemoteItem {
    /// The id as stored in item rows.
    #[must_use]
    pub fn identifier(&self) -> String {
        self.id.to_string()
    }

    /// Whether the remote reports this item as a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.ctype.eq_ignore_ascii_case(REMOTE_FOLDER_TYPE)
    }
}

/// Changes to one directory after a given anchor.
///
/// `anchor` is the position the batch brings the directory to. When
/// `remain` is positive, more changes follow and the caller should ask
/// again from `anchor`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryChanges {
    /// Items created or updated in the directory.
    pub new: Vec<RemoteItem>,
    /// Ids of items removed from the directory.
    pub erase: Vec<i64>,
    /// Anchor after this batch.
    pub anchor: i64,
    /// Number of changes still pending after this batch.
    pub remain: i64,
    /// Current child count of the directory.
    pub size: i64,
}

impl DirectoryChanges {
    /// Whether more changes are pending past this batch.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.remain > 0
    }

    /// Erased ids in row form.
    #[must_use]
    pub fn erased_identifiers(&self) -> Vec<String> {
        self.erase.iter().map(i64::to_string).collect()
    }

    /// Whether the batch carries no item changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.erase.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, ctype: &str) -> RemoteItem {
        RemoteItem {
            id,
            name: format!("item{id}"),
            ctype: ctype.into(),
            size: 0,
            mdate: 0,
            cdate: 0,
        }
    }

    #[test]
    fn folder_detection_ignores_case() {
        assert!(item(1, "folder").is_directory());
        assert!(item(1, "Folder").is_directory());
        assert!(!item(1, "image/png").is_directory());
    }

    #[test]
    fn identifiers_are_decimal() {
        assert_eq!(item(42, "folder").identifier(), "42");

        let changes = DirectoryChanges {
            erase: vec![7, 1000],
            ..DirectoryChanges::default()
        };
        assert_eq!(changes.erased_identifiers(), vec!["7", "1000"]);
    }

    #[test]
    fn remain_controls_more() {
        let mut changes = DirectoryChanges::default();
        assert!(!changes.has_more());
        assert!(changes.is_empty());
        changes.remain = 3;
        assert!(changes.has_more());
    }
}
