use crate::common::config::{PageId, PAGE_SIZE};
use crate::common::error::PageError;
use crate::storage::page::page::PageData;

/// Maximum length of an index name stored in a header record.
pub const MAX_NAME_LEN: usize = 32;

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
/// name length (4) | name bytes (32) | root page id (4)
const RECORD_SIZE: usize = 4 + MAX_NAME_LEN + 4;

/// View over page 0, which maps index names to their root page ids.
///
/// Header page format (size in bytes):
/// --------------------------------------------------------------
/// | RecordCount (4) | Record 1 (40) | Record 2 (40) | ... |
/// --------------------------------------------------------------
///
/// Record format:
/// --------------------------------------------------------------
/// | NameLength (4) | Name (32) | RootPageId (4) |
/// --------------------------------------------------------------
pub struct HeaderPage<'a> {
    data: &'a mut PageData,
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut PageData) -> Self {
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_u32(self.data, RECORD_COUNT_OFFSET) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        write_u32(self.data, RECORD_COUNT_OFFSET, count as u32);
    }

    fn record_name(&self, index: usize) -> &str {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        let len = read_u32(self.data, offset) as usize;
        std::str::from_utf8(&self.data[offset + 4..offset + 4 + len]).unwrap_or("")
    }

    fn record_root_id(&self, index: usize) -> PageId {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + 4 + MAX_NAME_LEN;
        read_u32(self.data, offset) as PageId
    }

    fn set_record_root_id(&mut self, index: usize, root_id: PageId) {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + 4 + MAX_NAME_LEN;
        write_u32(self.data, offset, root_id as u32);
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.record_name(i) == name)
    }

    /// Appends a `(name, root_page_id)` record. Fails on a duplicate name,
    /// an over-long name, or a full page.
    pub fn insert_record(&mut self, name: &str, root_id: PageId) -> Result<(), PageError> {
        if name.len() > MAX_NAME_LEN {
            return Err(PageError::NameTooLong(MAX_NAME_LEN));
        }
        if self.find_record(name).is_some() {
            return Err(PageError::DuplicateRecord(name.to_string()));
        }
        let count = self.record_count();
        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        if offset + RECORD_SIZE > PAGE_SIZE {
            return Err(PageError::HeaderFull);
        }

        write_u32(self.data, offset, name.len() as u32);
        self.data[offset + 4..offset + 4 + name.len()].copy_from_slice(name.as_bytes());
        write_u32(self.data, offset + 4 + MAX_NAME_LEN, root_id as u32);
        self.set_record_count(count + 1);
        Ok(())
    }

    /// Updates the root page id of an existing record.
    pub fn update_record(&mut self, name: &str, root_id: PageId) -> bool {
        match self.find_record(name) {
            Some(i) => {
                self.set_record_root_id(i, root_id);
                true
            }
            None => false,
        }
    }

    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.find_record(name) else {
            return false;
        };
        let count = self.record_count();
        // Shift the remaining records down over the deleted one.
        for i in index..count - 1 {
            let src = RECORDS_OFFSET + (i + 1) * RECORD_SIZE;
            let dst = RECORDS_OFFSET + i * RECORD_SIZE;
            self.data.copy_within(src..src + RECORD_SIZE, dst);
        }
        self.set_record_count(count - 1);
        true
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|i| self.record_root_id(i))
    }
}

fn read_u32(data: &PageData, offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn write_u32(data: &mut PageData, offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::INVALID_PAGE_ID;

    #[test]
    fn test_insert_and_get() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert_eq!(header.record_count(), 0);
        assert!(header.get_root_id("orders_pk").is_none());

        header.insert_record("orders_pk", 7).unwrap();
        header.insert_record("users_pk", INVALID_PAGE_ID).unwrap();
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_root_id("orders_pk"), Some(7));
        assert_eq!(header.get_root_id("users_pk"), Some(INVALID_PAGE_ID));
    }

    #[test]
    fn test_update_and_delete() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        header.insert_record("a", 1).unwrap();
        header.insert_record("b", 2).unwrap();
        header.insert_record("c", 3).unwrap();

        assert!(header.update_record("b", 42));
        assert!(!header.update_record("missing", 42));
        assert_eq!(header.get_root_id("b"), Some(42));

        assert!(header.delete_record("b"));
        assert_eq!(header.record_count(), 2);
        assert!(header.get_root_id("b").is_none());
        assert_eq!(header.get_root_id("a"), Some(1));
        assert_eq!(header.get_root_id("c"), Some(3));
    }

    #[test]
    fn test_duplicate_and_long_names_rejected() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        header.insert_record("idx", 1).unwrap();
        assert!(header.insert_record("idx", 2).is_err());
        assert!(header
            .insert_record(&"x".repeat(MAX_NAME_LEN + 1), 3)
            .is_err());
    }
}
