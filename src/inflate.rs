//! Raw DEFLATE expansion
//!
//! This decodes the raw bitstream of RFC 1951: a sequence of stored,
//! fixed-Huffman, or dynamic-Huffman blocks, the last of which carries a
//! final-block flag.  Symbols are literal bytes, an end-of-block marker, or
//! length/distance pairs that replay already-produced output through the
//! write cursor's back-reference copy.
//!
//! Only the expansion direction is provided; zlib/gzip wrappers, checksums,
//! and DEFLATE generation belong to other layers.  The decoder is strict:
//! every structural violation of the bitstream is reported as an error with
//! the input offset where it was detected, and corrupt input can never read
//! or write out of bounds.

use num_traits::FromPrimitive;
use std::sync::OnceLock;
use crate::Error;
use crate::tools::{slice_range,slice_range_mut};
use crate::tools::cursor::{ReadCursor,WriteCursor};
use crate::tools::huffman::*;

/// transmission order of the code-length code lengths in a dynamic header
const PRECODE_ORDER: [usize;PRECODE_SYMBOLS] = [16,17,18,0,8,7,9,6,10,5,11,4,12,3,13,2,14,1,15];

/// requested root widths, clamped by the builder to the lengths present
const LITLEN_ROOT: u32 = 9;
const DIST_ROOT: u32 = 6;
const PRECODE_ROOT: u32 = 7;

#[derive(num_derive::FromPrimitive)]
enum BlockType {
    Stored = 0,
    Fixed = 1,
    Dynamic = 2
}

/// The fixed-Huffman tables never change, build them once per process.
struct FixedTables {
    litlen: [Entry;512],
    litlen_root: u32,
    dist: [Entry;32],
    dist_root: u32
}

static FIXED_TABLES: OnceLock<FixedTables> = OnceLock::new();

fn fixed_tables() -> &'static FixedTables {
    FIXED_TABLES.get_or_init(|| {
        let mut lens = [8u8;288];
        for sym in 144..256 {
            lens[sym] = 9;
        }
        for sym in 256..280 {
            lens[sym] = 7;
        }
        let mut litlen = [Entry::INVALID;512];
        let litlen_root = build_table(Alphabet::Lengths,&lens,LITLEN_ROOT,&mut litlen)
            .expect("fixed literal/length code is complete");
        // all 32 distance symbols get 5 bits, the two unused ones decode to
        // invalid entries
        let mut dist = [Entry::INVALID;32];
        let dist_root = build_table(Alphabet::Distances,&[5u8;32],DIST_ROOT,&mut dist)
            .expect("fixed distance code is complete");
        FixedTables { litlen, litlen_root, dist, dist_root }
    })
}

fn table_reason(err: TableError) -> &'static str {
    match err {
        TableError::OverSubscribed => "over-subscribed code lengths",
        TableError::Incomplete => "incomplete code lengths",
        TableError::Overflow => "code table overflow"
    }
}

/// Expand a raw DEFLATE stream from `input` into `output`, returning the
/// number of bytes produced.  The whole input must be consumed by the
/// stream; trailing bytes are an error.  `Error::OutputTooSmall` reports an
/// exhausted output buffer distinctly from corrupt input, so the caller can
/// retry with a larger one.
pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<usize,Error> {
    let mut src = ReadCursor::new(input);
    let mut dst = WriteCursor::new(output);
    loop {
        let last = src.take_bits(1)? == 1;
        let block_type = src.take_bits(2)?;
        match BlockType::from_u32(block_type) {
            Some(BlockType::Stored) => stored_block(&mut src,&mut dst)?,
            Some(BlockType::Fixed) => {
                let fixed = fixed_tables();
                decode_block(&mut src,&mut dst,&fixed.litlen,fixed.litlen_root,&fixed.dist,fixed.dist_root)?;
            },
            Some(BlockType::Dynamic) => {
                let mut litlen = [Entry::INVALID;LITLEN_TABLE_SIZE];
                let mut dist = [Entry::INVALID;DIST_TABLE_SIZE];
                let (litlen_root,dist_root) = dynamic_tables(&mut src,&mut litlen,&mut dist)?;
                decode_block(&mut src,&mut dst,&litlen,litlen_root,&dist,dist_root)?;
            },
            None => {
                return Err(Error::Malformed(src.offset(),"invalid block type"));
            }
        }
        if last {
            break;
        }
    }
    if src.unread_bytes() > 0 {
        return Err(Error::Malformed(src.offset(),"trailing data after final block"));
    }
    Ok(dst.written())
}

/// Region variant of `decompress`, operating on an (offset,length) window of
/// each buffer.
pub fn decompress_range(input: &[u8], input_offset: usize, input_length: usize,
    output: &mut [u8], output_offset: usize, max_output_length: usize) -> Result<usize,Error> {
    let src = slice_range(input,input_offset,input_length)?;
    let dst = slice_range_mut(output,output_offset,max_output_length)?;
    decompress(src,dst)
}

/// Stored block: realign to a byte boundary, check the length against its
/// one's complement, then bulk-copy the literal bytes.
fn stored_block(src: &mut ReadCursor, dst: &mut WriteCursor) -> Result<(),Error> {
    src.align_to_byte();
    let len = src.read_u16_le()?;
    let nlen = src.read_u16_le()?;
    if len != !nlen {
        return Err(Error::Malformed(src.offset(),"stored block length check failed"));
    }
    dst.copy_from(src,len as usize)
}

/// Read a dynamic block header and build its two decoding tables, returning
/// the root widths.
fn dynamic_tables(src: &mut ReadCursor, litlen: &mut [Entry], dist: &mut [Entry]) -> Result<(u32,u32),Error> {
    let hlit = src.take_bits(5)? as usize + 257;
    let hdist = src.take_bits(5)? as usize + 1;
    let hclen = src.take_bits(4)? as usize + 4;
    if hlit > MAX_LITLEN_SYMBOLS {
        return Err(Error::Malformed(src.offset(),"too many literal/length codes"));
    }
    if hdist > MAX_DIST_SYMBOLS {
        return Err(Error::Malformed(src.offset(),"too many distance codes"));
    }
    // the code-length code's own lengths, 3 bits each in transmission order
    let mut pre_lens = [0u8;PRECODE_SYMBOLS];
    for i in 0..hclen {
        pre_lens[PRECODE_ORDER[i]] = src.take_bits(3)? as u8;
    }
    let mut precode = [Entry::INVALID;PRECODE_TABLE_SIZE];
    let pre_root = build_table(Alphabet::CodeLengths,&pre_lens,PRECODE_ROOT,&mut precode)
        .map_err(|e| Error::Malformed(src.offset(),table_reason(e)))?;
    // decode the literal/length and distance code lengths as one sequence,
    // with the run-length codes 16/17/18 checked against the expected total
    let total = hlit + hdist;
    let mut lens = [0u8;MAX_LITLEN_SYMBOLS+MAX_DIST_SYMBOLS];
    let mut i = 0;
    while i < total {
        src.fill_bits();
        let entry = precode[src.peek_bits(pre_root) as usize];
        src.consume_bits(entry.bits as u32)?;
        let (repeat,fill_val) = match (entry.op,entry.val) {
            (Op::Literal,0..=15) => {
                lens[i] = entry.val as u8;
                i += 1;
                continue;
            },
            (Op::Literal,16) => {
                if i == 0 {
                    return Err(Error::Malformed(src.offset(),"length repeat with no previous length"));
                }
                (3 + src.take_bits(2)? as usize, lens[i-1])
            },
            (Op::Literal,17) => (3 + src.take_bits(3)? as usize, 0),
            (Op::Literal,18) => (11 + src.take_bits(7)? as usize, 0),
            _ => {
                return Err(Error::Malformed(src.offset(),"invalid code length code"));
            }
        };
        if i + repeat > total {
            return Err(Error::Malformed(src.offset(),"length repeat overruns symbol count"));
        }
        for _ in 0..repeat {
            lens[i] = fill_val;
            i += 1;
        }
    }
    if lens[256] == 0 {
        return Err(Error::Malformed(src.offset(),"missing end-of-block code"));
    }
    let litlen_root = build_table(Alphabet::Lengths,&lens[..hlit],LITLEN_ROOT,litlen)
        .map_err(|e| Error::Malformed(src.offset(),table_reason(e)))?;
    let dist_root = build_table(Alphabet::Distances,&lens[hlit..total],DIST_ROOT,dist)
        .map_err(|e| Error::Malformed(src.offset(),table_reason(e)))?;
    Ok((litlen_root,dist_root))
}

/// The symbol loop shared by fixed and dynamic blocks: probe the root of the
/// literal/length table, follow a second-level link if the code is long, and
/// dispatch on the decoded entry until the end-of-block marker.
fn decode_block(src: &mut ReadCursor, dst: &mut WriteCursor,
    litlen: &[Entry], litlen_root: u32, dist: &[Entry], dist_root: u32) -> Result<(),Error> {
    loop {
        src.fill_bits();
        let mut entry = litlen[src.peek_bits(litlen_root) as usize];
        if let Op::Link = entry.op {
            src.consume_bits(entry.bits as u32)?;
            entry = litlen[entry.val as usize + src.peek_bits(entry.extra as u32) as usize];
        }
        src.consume_bits(entry.bits as u32)?;
        match entry.op {
            Op::Literal => {
                dst.write_byte(entry.val as u8)?;
            },
            Op::EndOfBlock => {
                return Ok(());
            },
            Op::Base => {
                let length = entry.val as usize + src.take_bits(entry.extra as u32)? as usize;
                src.fill_bits();
                let mut dentry = dist[src.peek_bits(dist_root) as usize];
                if let Op::Link = dentry.op {
                    src.consume_bits(dentry.bits as u32)?;
                    dentry = dist[dentry.val as usize + src.peek_bits(dentry.extra as u32) as usize];
                }
                src.consume_bits(dentry.bits as u32)?;
                let distance = match dentry.op {
                    Op::Base => dentry.val as usize + src.take_bits(dentry.extra as u32)? as usize,
                    _ => {
                        return Err(Error::Malformed(src.offset(),"invalid distance code"));
                    }
                };
                if distance > dst.written() {
                    return Err(Error::Malformed(src.offset(),"back-reference distance exceeds produced output"));
                }
                dst.copy_back_reference(distance,length)?;
            },
            _ => {
                return Err(Error::Malformed(src.offset(),"invalid huffman code"));
            }
        }
    }
}

// ---------- tests ----------

/// LSB-first bitstream writer for crafting adversarial streams, the
/// counterpart of the decoder's accumulator.  `bit_vec` only packs MSB-first
/// so the byte conversion mirrors the LSB layout by hand.
#[cfg(test)]
struct BitWriter {
    bits: bit_vec::BitVec
}

#[cfg(test)]
impl BitWriter {
    fn new() -> Self {
        Self { bits: bit_vec::BitVec::new() }
    }
    /// header fields go low bit first
    fn put(&mut self, num_bits: u32, val: u32) {
        for b in 0..num_bits {
            self.bits.push(val & (1 << b) != 0);
        }
    }
    /// huffman codes go high bit first
    fn put_code(&mut self, num_bits: u32, code: u32) {
        for b in (0..num_bits).rev() {
            self.bits.push(code & (1 << b) != 0);
        }
    }
    fn pad_to_byte(&mut self) {
        while self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }
    }
    fn put_bytes(&mut self, dat: &[u8]) {
        self.pad_to_byte();
        for &byte in dat {
            self.put(8,byte as u32);
        }
    }
    fn to_bytes(&self) -> Vec<u8> {
        let mut ans = vec![0u8;(self.bits.len()+7)/8];
        for i in 0..self.bits.len() {
            if self.bits.get(i).unwrap() {
                ans[i/8] |= 1 << (i%8);
            }
        }
        ans
    }
}

#[cfg(test)]
fn expand_hex(hex_str: &str, capacity: usize) -> Result<Vec<u8>,Error> {
    let dat = hex::decode(hex_str).expect("bad hex in test");
    let mut buf = vec![0u8;capacity];
    let count = decompress(&dat,&mut buf)?;
    buf.truncate(count);
    Ok(buf)
}

/// reference vectors produced by zlib 1.3 with raw windowBits, level 9
#[cfg(test)]
const PANGRAMS: &str = "The quick brown fox jumps over the lazy dog. The quick brown fox jumps over the lazy dog. Pack my box with five dozen liquor jugs. Pack my box with five dozen liquor jugs. How vexingly quick daft zebras jump! How vexingly quick daft zebras jump! ";
#[cfg(test)]
const PANGRAMS_DYNAMIC: &str = "95CECB0DC2301084E1568606A8832387346093B56370BCC4CFD8D5B342292039CF37D23F2D84ADB8D7073A720B30BCE35DD66F02578AC8327B353A66B6774C57F053895B3BB4A0E6F202E32AC93428C0BBAD7094AF4D17E0831B2AED2E58DF8F8E59998C413AAAF42FB99D433F";
#[cfg(test)]
const PANGRAMS_FIXED: &str = "0BC94855282CCD4CCE56482ACA2FCF5348CBAF50C82ACD2D2856C82F4B2D5228014AE72456552AA4E4A7EB298490A2382011A82EB7522109A8A83CB32443212DB32C152855959AA7909359589A5F04D49B5E4C82428FFC7285B2D48ACCBCF49C4AA83B5212D34A14AA52938A128BC12E51244E1100";

#[test]
fn dynamic_block() {
    let expanded = expand_hex(PANGRAMS_DYNAMIC,1024).expect("expansion failed");
    assert_eq!(expanded,PANGRAMS.as_bytes());
}

#[test]
fn fixed_and_dynamic_agree() {
    // the same token sequence coded with fixed and with dynamic tables must
    // reconstruct identical output
    let from_fixed = expand_hex(PANGRAMS_FIXED,1024).expect("expansion failed");
    let from_dynamic = expand_hex(PANGRAMS_DYNAMIC,1024).expect("expansion failed");
    assert_eq!(from_fixed,from_dynamic);
    assert_eq!(from_fixed,PANGRAMS.as_bytes());
}

#[test]
fn stored_block_round_trip() {
    // level-0 zlib output: one stored block of the 40 bytes 0x11..0x38
    let compressed = "012800D7FF1112131415161718191A1B1C1D1E1F202122232425262728292A2B2C2D2E2F303132333435363738";
    let expected: Vec<u8> = (0x11..0x39).collect();
    assert_eq!(expand_hex(compressed,64).expect("expansion failed"),expected);
}

#[test]
fn overlapping_run() {
    // 'a' repeated 100 times compresses to a distance-1 match that overlaps
    // its own output
    let expanded = expand_hex("4B4CA43D0000",128).expect("expansion failed");
    assert_eq!(expanded,vec![b'a';100]);
}

#[test]
fn empty_stream() {
    let expanded = expand_hex("0300",16).expect("expansion failed");
    assert_eq!(expanded.len(),0);
}

#[test]
fn truncation_always_fails() {
    let dat = hex::decode(PANGRAMS_DYNAMIC).unwrap();
    let mut buf = vec![0u8;1024];
    for cut in 0..dat.len() {
        assert!(decompress(&dat[0..cut],&mut buf).is_err(),"prefix of {} bytes accepted",cut);
    }
}

#[test]
fn output_too_small_is_distinct() {
    let dat = hex::decode(PANGRAMS_DYNAMIC).unwrap();
    let mut buf = vec![0u8;10];
    assert_eq!(decompress(&dat,&mut buf),Err(Error::OutputTooSmall));
    // and an exact-size buffer succeeds
    let mut buf = vec![0u8;PANGRAMS.len()];
    assert_eq!(decompress(&dat,&mut buf),Ok(PANGRAMS.len()));
}

#[test]
fn trailing_bytes_rejected() {
    let mut dat = hex::decode(PANGRAMS_DYNAMIC).unwrap();
    dat.push(0xAA);
    let mut buf = vec![0u8;1024];
    match decompress(&dat,&mut buf) {
        Err(Error::Malformed(_,reason)) => assert_eq!(reason,"trailing data after final block"),
        other => panic!("expected malformed, got {:?}",other)
    }
}

#[test]
fn invalid_block_type() {
    let mut writer = BitWriter::new();
    writer.put(1,1);
    writer.put(2,3);
    let mut buf = [0u8;16];
    match decompress(&writer.to_bytes(),&mut buf) {
        Err(Error::Malformed(_,reason)) => assert_eq!(reason,"invalid block type"),
        other => panic!("expected malformed, got {:?}",other)
    }
}

#[test]
fn stored_length_check() {
    let mut writer = BitWriter::new();
    writer.put(1,1);
    writer.put(2,0);
    writer.put_bytes(&[0x03,0x00,0xFC,0xFF,b'a',b'b',b'c']);
    let mut buf = [0u8;16];
    assert_eq!(decompress(&writer.to_bytes(),&mut buf),Ok(3));
    assert_eq!(&buf[0..3],b"abc");
    // flip one bit of the complement
    let mut writer = BitWriter::new();
    writer.put(1,1);
    writer.put(2,0);
    writer.put_bytes(&[0x03,0x00,0xFD,0xFF,b'a',b'b',b'c']);
    match decompress(&writer.to_bytes(),&mut buf) {
        Err(Error::Malformed(_,reason)) => assert_eq!(reason,"stored block length check failed"),
        other => panic!("expected malformed, got {:?}",other)
    }
}

#[test]
fn over_subscribed_precode() {
    // a dynamic header declaring 19 code-length codes of length 1 describes
    // far more codes than the bit space holds
    let mut writer = BitWriter::new();
    writer.put(1,1);
    writer.put(2,2);
    writer.put(5,0);  // hlit = 257
    writer.put(5,0);  // hdist = 1
    writer.put(4,15); // hclen = 19
    for _ in 0..19 {
        writer.put(3,1);
    }
    let mut buf = [0u8;16];
    match decompress(&writer.to_bytes(),&mut buf) {
        Err(Error::Malformed(_,reason)) => assert_eq!(reason,"over-subscribed code lengths"),
        other => panic!("expected malformed, got {:?}",other)
    }
}

#[test]
fn missing_end_of_block() {
    // a dynamic block whose lengths give symbol 256 no code; the precode has
    // two one-bit codes, symbol 1 -> 0 and symbol 18 -> 1
    let mut writer = BitWriter::new();
    writer.put(1,1);
    writer.put(2,2);
    writer.put(5,0);   // hlit = 257
    writer.put(5,0);   // hdist = 1
    writer.put(4,14);  // hclen = 18, covers symbols 18 and 1 in the order
    for i in 0..18 {
        writer.put(3,if i == 2 || i == 17 { 1 } else { 0 });
    }
    writer.put_code(1,0);              // lens[0] = 1
    writer.put_code(1,0);              // lens[1] = 1
    writer.put_code(1,1);
    writer.put(7,127);                 // repeat zero 138 times
    writer.put_code(1,1);
    writer.put(7,106);                 // repeat zero 117 times, through 256
    writer.put_code(1,0);              // the single distance code
    let mut buf = [0u8;16];
    match decompress(&writer.to_bytes(),&mut buf) {
        Err(Error::Malformed(_,reason)) => assert_eq!(reason,"missing end-of-block code"),
        other => panic!("expected malformed, got {:?}",other)
    }
}

#[test]
fn distance_before_any_output() {
    // fixed block opening directly with a match: length code 257, distance
    // code 0, but nothing has been produced yet
    let mut writer = BitWriter::new();
    writer.put(1,1);
    writer.put(2,1);
    writer.put_code(7,1);  // symbol 257, length base 3
    writer.put_code(5,0);  // distance symbol 0, distance 1
    let mut buf = [0u8;16];
    match decompress(&writer.to_bytes(),&mut buf) {
        Err(Error::Malformed(_,reason)) => assert_eq!(reason,"back-reference distance exceeds produced output"),
        other => panic!("expected malformed, got {:?}",other)
    }
}

#[test]
fn range_variant() {
    let dat = hex::decode(PANGRAMS_DYNAMIC).unwrap();
    let mut padded = vec![0xEEu8;4];
    padded.extend_from_slice(&dat);
    let mut buf = vec![0u8;1024];
    let count = decompress_range(&padded,4,dat.len(),&mut buf,8,1000).expect("expansion failed");
    assert_eq!(&buf[8..8+count],PANGRAMS.as_bytes());
    assert_eq!(decompress_range(&padded,4,padded.len(),&mut buf,0,1000),
        Err(Error::InvalidArgument("region exceeds buffer bounds")));
}
