use scroll::{ctx, Endian, Pread, LE};

/// The fixed `PKG1` header at the top of every archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct WzHeader<'a> {
    pub ident: &'a str,
    pub fsize: u64,
    /// data-section start, the base every relative offset hangs off
    pub fstart: usize,
    pub copyright: &'a str,
}

pub const WZ_HEADER_IDENT: &str = "PKG1";

impl<'a> ctx::TryFromCtx<'a, Endian> for WzHeader<'a> {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], _: Endian) -> Result<(Self, usize), Self::Error> {
        Self::read_from_buf(src)
    }
}

impl<'a> WzHeader<'a> {
    pub fn get_ident(buf: &[u8]) -> Result<&str, scroll::Error> {
        buf.get(0..4)
            .ok_or(scroll::Error::TooBig { size: 4, len: buf.len() })?
            .pread::<&str>(0)
    }
    pub fn get_wz_fsize(buf: &[u8]) -> Result<u64, scroll::Error> {
        buf.pread_with::<u64>(4, LE)
    }
    pub fn get_wz_fstart(buf: &[u8]) -> Result<u32, scroll::Error> {
        buf.pread_with::<u32>(12, LE)
    }
    /// The null-terminated ASCII copyright string following the fixed
    /// fields.
    pub fn get_wz_copyright(buf: &'a [u8], fstart: usize) -> Result<&'a str, scroll::Error> {
        let tail = buf
            .get(16..fstart)
            .ok_or(scroll::Error::TooBig { size: fstart, len: buf.len() })?;
        let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        tail[..end].pread_with::<&str>(0, scroll::ctx::StrCtx::Length(end))
    }

    pub fn read_from_buf(buf: &'a [u8]) -> Result<(WzHeader<'a>, usize), scroll::Error> {
        let ident = Self::get_ident(buf)?;
        let fsize = Self::get_wz_fsize(buf)?;
        let fstart = Self::get_wz_fstart(buf)? as usize;
        let copyright = Self::get_wz_copyright(buf, fstart)?;

        Ok((
            WzHeader {
                ident,
                fsize,
                fstart,
                copyright,
            },
            fstart,
        ))
    }

    pub fn is_valid(&self) -> bool {
        self.ident == WZ_HEADER_IDENT
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_header_round() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"PKG1");
        buf.extend_from_slice(&364u64.to_le_bytes());
        buf.extend_from_slice(&60u32.to_le_bytes());
        buf.extend_from_slice(b"Package file v1.0 Copyright 2002 Wizet, ZMS\0");
        buf.extend_from_slice(&[0; 64]);

        let (header, fstart) = WzHeader::read_from_buf(&buf).unwrap();

        assert!(header.is_valid());
        assert_eq!(header.fsize, 364);
        assert_eq!(header.fstart, 60);
        assert_eq!(fstart, 60);
        assert_eq!(
            header.copyright,
            "Package file v1.0 Copyright 2002 Wizet, ZMS"
        );
    }

    #[test]
    fn test_bad_ident() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"PKG9");
        buf.extend_from_slice(&64u64.to_le_bytes());
        buf.extend_from_slice(&20u32.to_le_bytes());
        buf.extend_from_slice(b"xyz\0");

        let (header, _) = WzHeader::read_from_buf(&buf).unwrap();
        assert!(!header.is_valid());
    }
}
