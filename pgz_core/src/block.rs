/// One unit of work flowing through the pipeline.
///
/// `id` is the dense, zero-based sequence number assigned by the supplier in
/// read order and is the only ordering key downstream. A zero-length payload
/// is the end-of-stream sentinel; suppliers never emit an empty block for any
/// other reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    id: u64,
    payload: Vec<u8>,
}

impl DataBlock {
    pub fn new(id: u64, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// The end-of-stream marker carrying the next unused id.
    pub fn sentinel(id: u64) -> Self {
        Self {
            id,
            payload: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.payload.is_empty()
    }

    /// Give up the block, keeping only its bytes.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
