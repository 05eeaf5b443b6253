//! `ETag` helpers
//!
//! Plain objects and parts use the hex MD5 of their bytes. A completed
//! multipart object uses the hex MD5 of the concatenated binary part
//! digests followed by `-<part count>`.

/// Generate the etag of a complete in-memory body
pub fn content_etag(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Wrap an etag in double quotes for use in an HTTP header
pub fn quote(etag: &str) -> String {
    format!("\"{etag}\"")
}

/// Strip surrounding quotes, if any, so client-supplied etags compare
/// equal whether they were echoed quoted or not
pub fn normalize(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

/// Incremental hasher for streamed bodies
pub struct StreamingEtag {
    ctx: md5::Context,
}

impl StreamingEtag {
    pub fn new() -> Self {
        Self {
            ctx: md5::Context::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.ctx.consume(chunk);
    }

    /// Raw 16-byte digest
    pub fn finish(self) -> [u8; 16] {
        self.ctx.compute().0
    }
}

impl Default for StreamingEtag {
    fn default() -> Self {
        Self::new()
    }
}

/// Combines part digests into a multipart etag
pub struct MultipartEtag {
    ctx: md5::Context,
    parts: usize,
}

impl MultipartEtag {
    pub fn new() -> Self {
        Self {
            ctx: md5::Context::new(),
            parts: 0,
        }
    }

    pub fn push(&mut self, part_digest: &[u8]) {
        self.ctx.consume(part_digest);
        self.parts += 1;
    }

    pub fn finish(self) -> String {
        format!("{:x}-{}", self.ctx.compute(), self.parts)
    }
}

impl Default for MultipartEtag {
    fn default() -> Self {
        Self::new()
    }
}
