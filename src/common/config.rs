/** Size of a data page in bytes. */
pub const PAGE_SIZE: usize = 4096;

/** Default size of the buffer pool. */
pub const BUFFER_POOL_SIZE: usize = 10;

/** Number of slots in an extendible hash bucket. */
pub const BUCKET_SIZE: usize = 50;

/** Lookback window for the LRU-K replacer. */
pub const LRUK_REPLACER_K: usize = 2;

pub const INVALID_PAGE_ID: PageId = -1; // invalid page id
pub const HEADER_PAGE_ID: PageId = 0; // the header page id
pub const INVALID_TXN_ID: TxnId = -1; // invalid transaction id
pub const INVALID_LSN: Lsn = -1; // invalid log sequence number

pub type FrameId = usize; // frame id type, an index into the pool
pub type PageId = i32; // page id type
pub type TxnId = i64; // transaction id type
pub type Lsn = i64; // log sequence number type
