//! Relocatable object modules and their wire format.
//!
//! A module holds three segments (text, data, bss) and a symbol
//! table. Text and data are sequences of literal byte runs mixed with
//! relocation references; bss is stored only as a length.
//!
//! The serialised form is little-endian throughout: a header of three
//! `u16` segment lengths, then the text and data record streams, then
//! the symbol table, then a terminating zero byte. A stream record
//! starts with a signed length byte: a positive value prefixes that
//! many literal bytes, a negative value is a reference whose magnitude
//! is the flag byte (the always-set bit keeps it negative), and zero
//! ends the stream. A reference with the symbol flag carries an
//! 8-byte NUL-padded name; every reference ends with a 16-bit
//! constant addend.

use core::fmt;

use indexmap::IndexMap;

/// Symbol names are fixed at eight bytes on the wire.
pub const NAME_LEN: usize = 8;

/// Symbol flags: segment number in the low two bits, then markers.
pub const SEG_TEXT: u8 = 0;
pub const SEG_DATA: u8 = 1;
pub const SEG_BSS: u8 = 2;
pub const SEG_MASK: u8 = 3;
/// Undefined here; to be resolved against other modules.
pub const SYM_EXTERN: u8 = 4;
/// Visible to other modules for linking.
pub const SYM_EXPORT: u8 = 8;
/// A common symbol; the value field holds its size.
pub const SYM_COMMON: u8 = 16;

/// Reference flags.
pub const REF_BYTE: u8 = 1;
pub const REF_HI: u8 = 2;
pub const REF_SYMBOL: u8 = 4;
pub const REF_HILO: u8 = 8;
/// Keeps the flag byte negative in the record stream.
pub const REF_ALWAYS: u8 = 16;

const REF_ALL: u8 = REF_BYTE | REF_HI | REF_SYMBOL | REF_HILO | REF_ALWAYS;

/// The error type used for object module parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(pub(crate) &'static str);

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for Error {}

/// The result type used for object module parsing.
pub type Result<T> = core::result::Result<T, Error>;

/// A symbol table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjSymbol {
    /// Symbol name, at most [`NAME_LEN`] bytes when serialised.
    pub name: String,
    /// Segment-relative value, or the size for commons.
    pub value: u16,
    pub flags: u8,
}

impl ObjSymbol {
    pub fn new(name: impl Into<String>, value: u16, flags: u8) -> Self {
        ObjSymbol {
            name: name.into(),
            value,
            flags,
        }
    }

    /// The segment number from the flag bits.
    pub fn seg(&self) -> u8 {
        self.flags & SEG_MASK
    }

    pub fn is_export(&self) -> bool {
        self.flags & SYM_EXPORT != 0
    }

    pub fn is_common(&self) -> bool {
        self.flags & SYM_COMMON != 0
    }

    pub fn is_extern(&self) -> bool {
        self.flags & SYM_EXTERN != 0
    }
}

/// A relocation reference inside a segment stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub flags: u8,
    /// Symbol name; empty unless [`REF_SYMBOL`] is set.
    pub name: String,
    /// Constant addend.
    pub con: u16,
}

impl Reference {
    /// The number of bytes this reference patches in the image.
    pub fn size(&self) -> u16 {
        if self.flags & REF_BYTE != 0 {
            1
        } else {
            2
        }
    }

    pub fn has_symbol(&self) -> bool {
        self.flags & REF_SYMBOL != 0
    }
}

/// One element of a segment stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Bytes(Vec<u8>),
    Ref(Reference),
}

impl Piece {
    pub fn size(&self) -> u16 {
        match self {
            Piece::Bytes(bytes) => bytes.len() as u16,
            Piece::Ref(reference) => reference.size(),
        }
    }
}

/// A relocatable object module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub text: Vec<Piece>,
    pub data: Vec<Piece>,
    pub symtab: IndexMap<String, ObjSymbol>,
    pub bss_len: u16,
}

impl Module {
    /// The byte length of a segment stream.
    pub fn seg_len(pieces: &[Piece]) -> u16 {
        pieces.iter().map(Piece::size).fold(0, u16::wrapping_add)
    }

    pub fn text_len(&self) -> u16 {
        Self::seg_len(&self.text)
    }

    pub fn data_len(&self) -> u16 {
        Self::seg_len(&self.data)
    }

    /// Serialise the module.
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.text_len().to_le_bytes());
        out.extend_from_slice(&self.data_len().to_le_bytes());
        out.extend_from_slice(&self.bss_len.to_le_bytes());
        for seg in [&self.text, &self.data] {
            for piece in seg {
                write_piece(&mut out, piece);
            }
            out.push(0);
        }
        for symbol in self.symtab.values() {
            out.extend_from_slice(&name_bytes(&symbol.name));
            out.extend_from_slice(&symbol.value.to_le_bytes());
            out.push(symbol.flags);
        }
        out.push(0);
        out
    }

    /// Parse a serialised module.
    pub fn parse(data: &[u8]) -> Result<Module> {
        let mut reader = Reader { data, pos: 0 };
        let text_len = reader.word()?;
        let data_len = reader.word()?;
        let bss_len = reader.word()?;

        let text = reader.segment()?;
        if Self::seg_len(&text) != text_len {
            return Err(Error("text segment length mismatch"));
        }
        let data_seg = reader.segment()?;
        if Self::seg_len(&data_seg) != data_len {
            return Err(Error("data segment length mismatch"));
        }

        let mut symtab = IndexMap::new();
        loop {
            if reader.peek()? == 0 {
                break;
            }
            let name = reader.name()?;
            let value = reader.word()?;
            let flags = reader.byte()?;
            let symbol = ObjSymbol::new(name, value, flags);
            if symtab.insert(symbol.name.clone(), symbol).is_some() {
                return Err(Error("redefined symbol in object module"));
            }
        }

        Ok(Module {
            text,
            data: data_seg,
            symtab,
            bss_len,
        })
    }
}

fn write_piece(out: &mut Vec<u8>, piece: &Piece) {
    match piece {
        Piece::Bytes(bytes) => {
            // Literal runs are limited to the positive range of the
            // signed length byte.
            for chunk in bytes.chunks(i8::MAX as usize) {
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
        }
        Piece::Ref(reference) => {
            let flags = (reference.flags | REF_ALWAYS) & REF_ALL;
            out.push(flags.wrapping_neg());
            if reference.has_symbol() {
                out.extend_from_slice(&name_bytes(&reference.name));
            }
            out.extend_from_slice(&reference.con.to_le_bytes());
        }
    }
}

/// Encode a symbol name: truncated to eight bytes, NUL padded.
fn name_bytes(name: &str) -> [u8; NAME_LEN] {
    let mut out = [0u8; NAME_LEN];
    for (slot, byte) in out.iter_mut().zip(name.bytes()) {
        *slot = byte;
    }
    out
}

struct Reader<'data> {
    data: &'data [u8],
    pos: usize,
}

impl<'data> Reader<'data> {
    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(Error("object module truncated"))
    }

    fn byte(&mut self) -> Result<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn word(&mut self) -> Result<u16> {
        let lo = self.byte()?;
        let hi = self.byte()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn take(&mut self, len: usize) -> Result<&'data [u8]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or(Error("object module truncated"))?;
        self.pos += len;
        Ok(bytes)
    }

    fn name(&mut self) -> Result<String> {
        let raw = self.take(NAME_LEN)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = core::str::from_utf8(&raw[..end])
            .map_err(|_| Error("bad symbol name encoding"))?;
        Ok(name.to_string())
    }

    /// Read one segment stream, fusing the signed length byte with
    /// the flag byte when it is negative.
    fn segment(&mut self) -> Result<Vec<Piece>> {
        let mut pieces = Vec::new();
        loop {
            let count = self.byte()? as i8;
            if count == 0 {
                return Ok(pieces);
            }
            if count > 0 {
                let bytes = self.take(count as usize)?;
                pieces.push(Piece::Bytes(bytes.to_vec()));
            } else {
                let flags = count.unsigned_abs();
                if flags & REF_ALWAYS == 0 || flags & !REF_ALL != 0 {
                    return Err(Error("bad reference flags"));
                }
                let name = if flags & REF_SYMBOL != 0 {
                    self.name()?
                } else {
                    String::new()
                };
                let con = self.word()?;
                pieces.push(Piece::Ref(Reference { flags, name, con }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Module {
        let mut module = Module::default();
        module.text.push(Piece::Bytes(vec![0x21, 0x03, 0x00]));
        module.text.push(Piece::Ref(Reference {
            flags: REF_SYMBOL | REF_ALWAYS,
            name: "cret".to_string(),
            con: 0,
        }));
        module.data.push(Piece::Bytes(b"hi\0".to_vec()));
        module.bss_len = 4;
        module.symtab.insert(
            "_main".to_string(),
            ObjSymbol::new("_main", 0, SEG_TEXT | SYM_EXPORT),
        );
        module.symtab.insert(
            "_x".to_string(),
            ObjSymbol::new("_x", 2, SEG_BSS | SYM_COMMON | SYM_EXPORT),
        );
        module
    }

    #[test]
    fn round_trips() {
        let module = sample();
        let bytes = module.write();
        let parsed = Module::parse(&bytes).unwrap();
        assert_eq!(parsed.text, module.text);
        assert_eq!(parsed.data, module.data);
        assert_eq!(parsed.bss_len, module.bss_len);
        assert_eq!(parsed.symtab, module.symtab);
    }

    #[test]
    fn header_lengths() {
        let module = sample();
        let bytes = module.write();
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 5);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 3);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 4);
    }

    #[test]
    fn long_runs_are_chunked() {
        let mut module = Module::default();
        module.text.push(Piece::Bytes(vec![0xAA; 300]));
        let bytes = module.write();
        let parsed = Module::parse(&bytes).unwrap();
        assert_eq!(parsed.text_len(), 300);
        // Three records: 127 + 127 + 46.
        assert_eq!(parsed.text.len(), 3);
    }

    #[test]
    fn reference_flag_byte_is_negative() {
        let mut module = Module::default();
        module.text.push(Piece::Ref(Reference {
            flags: REF_SYMBOL,
            name: "foo".to_string(),
            con: 0x1234,
        }));
        let bytes = module.write();
        // Header, then the fused length/flag byte.
        let flag_byte = bytes[6] as i8;
        assert!(flag_byte < 0);
        assert_eq!(flag_byte.unsigned_abs(), REF_SYMBOL | REF_ALWAYS);
        let parsed = Module::parse(&bytes).unwrap();
        match &parsed.text[0] {
            Piece::Ref(reference) => {
                assert_eq!(reference.name, "foo");
                assert_eq!(reference.con, 0x1234);
                assert!(reference.has_symbol());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn names_truncate_to_eight_bytes() {
        let mut module = Module::default();
        module.symtab.insert(
            "_averylongname".to_string(),
            ObjSymbol::new("_averylongname", 0, SEG_TEXT | SYM_EXPORT),
        );
        let parsed = Module::parse(&module.write()).unwrap();
        assert!(parsed.symtab.contains_key("_averylo"));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let module = sample();
        let bytes = module.write();
        for len in [0, 3, 7, bytes.len() - 1] {
            assert!(Module::parse(&bytes[..len]).is_err());
        }
    }
}
