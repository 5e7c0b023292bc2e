//! LZ4 block compression and expansion
//!
//! This is the raw block codec: a hash-based greedy match finder that emits
//! the LZ4 token stream on the way down, and the token reader that replays
//! it on the way up.  A block carries no framing of its own (no length, no
//! checksum, no magic); delimiting the block is the caller's business.
//!
//! Compression is a pure, total function of the input bytes: the same input
//! always yields the same block, and any input up to the hard size ceiling
//! compresses into `max_compressed_length` bytes or fewer.  The match finder
//! keys an 8-byte window through a multiplicative hash into a small position
//! table, verifies and extends candidate matches, and accelerates its stride
//! over incompressible stretches so such input is scanned in sub-linear
//! probe counts.
//!
//! The expansion side checks every token against the bytes actually present
//! and produced; corrupt or truncated blocks fail with an offset, they can
//! never read or write out of bounds.

use crate::Error;
use crate::tools::{slice_range,slice_range_mut};
use crate::tools::cursor::{ReadCursor,WriteCursor};

/// matches shorter than this are never emitted
pub const MIN_MATCH: usize = 4;
/// back references cannot reach farther than this
const MAX_DISTANCE: usize = 65535;
/// this many trailing bytes are always emitted as literals
const LAST_LITERALS: usize = 5;
/// the probe stride doubles every `2^SKIP_STRENGTH` failed probes
const SKIP_STRENGTH: u32 = 6;
/// inputs below this length cannot contain a representable match
const MIN_COMPRESSIBLE: usize = MIN_MATCH + LAST_LITERALS + 1;
const MIN_TABLE_SIZE: usize = 16;
const MAX_TABLE_SIZE: usize = 4096;
/// hard ceiling on input length, anything larger is a caller error
pub const MAX_INPUT_LENGTH: usize = 0x7E00_0000;

const HASH_MULTIPLIER: u64 = 0x9E37_79B1_85EB_CA87;

/// Worst-case compressed size for `input_length` bytes.  One call to
/// `compress` with this much output capacity always succeeds; there is no
/// internal retry or growth.
pub fn max_compressed_length(input_length: usize) -> usize {
    input_length + input_length/255 + 16
}

/// Caller-owned scratch for the match finder's position table.  One scratch
/// serves any number of sequential `compress_with` calls; concurrent calls
/// each need their own (the borrow checker enforces as much).  The table is
/// re-cleared on every call, so a fresh value carries no history.
pub struct Scratch {
    table: Vec<u32>
}

impl Scratch {
    pub fn new() -> Self {
        Self {
            table: vec![0;MAX_TABLE_SIZE]
        }
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

/// smallest power of two >= `input_length`, clamped to the table bounds
fn table_size_for(input_length: usize) -> usize {
    let mut size = MIN_TABLE_SIZE;
    while size < input_length && size < MAX_TABLE_SIZE {
        size <<= 1;
    }
    size
}

fn read_u32_le(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(buf[pos..pos+4].try_into().expect("4 byte window"))
}

fn read_u64_le(buf: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(buf[pos..pos+8].try_into().expect("8 byte window"))
}

/// spread the 8-byte window at `pos` across `64 - shift` hash bits
fn hash_window(buf: &[u8], pos: usize, shift: u32) -> usize {
    (read_u64_le(buf,pos).wrapping_mul(HASH_MULTIPLIER) >> shift) as usize
}

/// Matched byte count between the runs starting at `pos` (ahead) and `cand`
/// (behind), where only bytes before `limit` may participate.  Compares a
/// word at a time and finishes the tail byte-wise.
fn common_length(buf: &[u8], pos: usize, cand: usize, limit: usize) -> usize {
    let mut count = 0;
    while pos + count + 8 <= limit {
        let diff = read_u64_le(buf,pos+count) ^ read_u64_le(buf,cand+count);
        if diff != 0 {
            return count + diff.trailing_zeros() as usize/8;
        }
        count += 8;
    }
    while pos + count < limit && buf[pos+count] == buf[cand+count] {
        count += 1;
    }
    count
}

/// run-length tail shared by literal runs and match lengths: whole 255 steps
/// then the remainder
fn write_overflow_length(out: &mut WriteCursor, mut excess: usize) -> Result<(),Error> {
    while excess >= 255 {
        out.write_byte(255)?;
        excess -= 255;
    }
    out.write_byte(excess as u8)
}

fn read_overflow_length(src: &mut ReadCursor) -> Result<usize,Error> {
    let mut ans = 0;
    loop {
        let byte = src.read_byte()?;
        ans += byte as usize;
        if byte != 255 {
            return Ok(ans);
        }
    }
}

/// one (literal run, back reference) token
fn emit_sequence(out: &mut WriteCursor, literals: &[u8], distance: usize, match_length: usize) -> Result<(),Error> {
    let fill = match_length - MIN_MATCH;
    let token = ((literals.len().min(15) as u8) << 4) | fill.min(15) as u8;
    out.write_byte(token)?;
    if literals.len() >= 15 {
        write_overflow_length(out,literals.len()-15)?;
    }
    out.write_slice(literals)?;
    out.write_u16_le(distance as u16)?;
    if fill >= 15 {
        write_overflow_length(out,fill-15)?;
    }
    Ok(())
}

/// the closing literal-only token
fn emit_last_run(out: &mut WriteCursor, literals: &[u8]) -> Result<(),Error> {
    out.write_byte((literals.len().min(15) as u8) << 4)?;
    if literals.len() >= 15 {
        write_overflow_length(out,literals.len()-15)?;
    }
    out.write_slice(literals)
}

/// Compress `input` into `output`, returning the compressed size.  The
/// output capacity must be at least `max_compressed_length(input.len())`;
/// offering less is a caller error, not a data condition.
pub fn compress(input: &[u8], output: &mut [u8]) -> Result<usize,Error> {
    let mut scratch = Scratch::new();
    compress_with(&mut scratch,input,output)
}

/// `compress` against a caller-owned `Scratch`, skipping the per-call table
/// allocation.
pub fn compress_with(scratch: &mut Scratch, input: &[u8], output: &mut [u8]) -> Result<usize,Error> {
    if input.len() > MAX_INPUT_LENGTH {
        return Err(Error::InvalidArgument("input exceeds maximum length"));
    }
    if output.len() < max_compressed_length(input.len()) {
        return Err(Error::InvalidArgument("output capacity below max_compressed_length"));
    }
    let mut out = WriteCursor::new(output);
    if input.len() < MIN_COMPRESSIBLE {
        emit_last_run(&mut out,input)?;
        return Ok(out.written());
    }
    let table_size = table_size_for(input.len());
    let shift = 64 - table_size.trailing_zeros();
    let table = &mut scratch.table[0..table_size];
    table.fill(0);

    // matches may not extend into the reserved tail, and the 8-byte hash
    // window must stay in bounds
    let match_limit = input.len() - LAST_LITERALS;
    let hash_limit = input.len() - 8;
    let mut anchor = 0;
    table[hash_window(input,0,shift)] = 0;
    let mut position = 1;
    loop {
        // probe for a match, striding faster as probes fail
        let mut search = position;
        let mut attempts = 1u32 << SKIP_STRENGTH;
        let found = loop {
            if search + MIN_MATCH > match_limit || search > hash_limit {
                break None;
            }
            let slot = hash_window(input,search,shift);
            let candidate = table[slot] as usize;
            table[slot] = search as u32;
            // stale and colliding entries are weeded out here: the candidate
            // must be near enough and actually start with the same 4 bytes
            if search - candidate <= MAX_DISTANCE && read_u32_le(input,candidate) == read_u32_le(input,search) {
                break Some((search,candidate));
            }
            search += (attempts >> SKIP_STRENGTH) as usize;
            attempts += 1;
        };
        let (mut pos,mut cand) = match found {
            Some(hit) => hit,
            None => break
        };
        // grow the match backward over any equal bytes ahead of the anchor
        while pos > anchor && cand > 0 && input[pos-1] == input[cand-1] {
            pos -= 1;
            cand -= 1;
        }
        let match_length = MIN_MATCH + common_length(input,pos+MIN_MATCH,cand+MIN_MATCH,match_limit);
        emit_sequence(&mut out,&input[anchor..pos],pos-cand,match_length)?;
        position = pos + match_length;
        anchor = position;
        // index a position inside the span we jumped over, the next probe
        // benefits from it on repetitive data
        if position >= 2 && position - 2 <= hash_limit {
            table[hash_window(input,position-2,shift)] = (position-2) as u32;
        }
    }
    emit_last_run(&mut out,&input[anchor..])?;
    Ok(out.written())
}

/// Region variant of `compress`.
pub fn compress_range(input: &[u8], input_offset: usize, input_length: usize,
    output: &mut [u8], output_offset: usize, max_output_length: usize) -> Result<usize,Error> {
    let src = slice_range(input,input_offset,input_length)?;
    let dst = slice_range_mut(output,output_offset,max_output_length)?;
    compress(src,dst)
}

/// Expand an LZ4 block from `input` into `output`, returning the expanded
/// size.  The closing token must be a literal-only run covering the reserved
/// tail, which is how every block this module emits ends; anything else is
/// reported as corrupt rather than silently accepted short.
pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<usize,Error> {
    let mut src = ReadCursor::new(input);
    let mut out = WriteCursor::new(output);
    loop {
        let token = src.read_byte()?;
        let mut literal_count = (token >> 4) as usize;
        if literal_count == 15 {
            literal_count += read_overflow_length(&mut src)?;
        }
        out.copy_from(&mut src,literal_count)?;
        if src.is_empty() {
            if token & 0x0F != 0 {
                return Err(Error::Malformed(src.offset(),"block ends inside a match token"));
            }
            if literal_count < LAST_LITERALS && literal_count != out.written() {
                return Err(Error::Malformed(src.offset(),"closing literal run shorter than reserved tail"));
            }
            break;
        }
        let distance = src.read_u16_le()? as usize;
        if distance == 0 || distance > out.written() {
            return Err(Error::Malformed(src.offset(),"back-reference distance exceeds produced output"));
        }
        let mut match_length = MIN_MATCH + (token & 0x0F) as usize;
        if token & 0x0F == 0x0F {
            match_length += read_overflow_length(&mut src)?;
        }
        out.copy_back_reference(distance,match_length)?;
    }
    Ok(out.written())
}

/// Region variant of `decompress`.
pub fn decompress_range(input: &[u8], input_offset: usize, input_length: usize,
    output: &mut [u8], output_offset: usize, max_output_length: usize) -> Result<usize,Error> {
    let src = slice_range(input,input_offset,input_length)?;
    let dst = slice_range_mut(output,output_offset,max_output_length)?;
    decompress(src,dst)
}

// ---------- tests ----------

/// deterministic pseudo-random bytes, enough to defeat the match finder
#[cfg(test)]
fn noise(count: usize, mut seed: u64) -> Vec<u8> {
    let mut ans = Vec::with_capacity(count);
    for _ in 0..count {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ans.push((seed >> 56) as u8);
    }
    ans
}

#[cfg(test)]
fn round_trip(dat: &[u8]) {
    let mut compressed = vec![0u8;max_compressed_length(dat.len())];
    let csize = compress(dat,&mut compressed).expect("compression failed");
    assert!(csize <= max_compressed_length(dat.len()));
    let mut expanded = vec![0u8;dat.len()];
    let xsize = decompress(&compressed[0..csize],&mut expanded).expect("expansion failed");
    assert_eq!(xsize,dat.len());
    assert_eq!(expanded,dat);
}

#[test]
fn round_trip_all_small_lengths() {
    for count in 0..=300 {
        round_trip(&noise(count,count as u64 + 1));
        round_trip(&vec![b'q';count]);
        let patterned: Vec<u8> = (0..count).map(|i| ((i*7)%256) as u8).collect();
        round_trip(&patterned);
        let wordy: Vec<u8> = b"abcabcabdeabcabcfg".iter().cycle().take(count).copied().collect();
        round_trip(&wordy);
    }
}

#[test]
fn round_trip_large() {
    round_trip(&noise(65536 + 100,99));
    let mut dat = noise(1000,3);
    // splice in long repeats to exercise far back references
    let chunk = dat[0..400].to_vec();
    for _ in 0..50 {
        dat.extend_from_slice(&chunk);
    }
    round_trip(&dat);
}

#[test]
fn incompressible_stays_bounded() {
    let dat = noise(4096,42);
    let mut compressed = vec![0u8;max_compressed_length(dat.len())];
    let csize = compress(&dat,&mut compressed).expect("compression failed");
    assert!(csize <= max_compressed_length(dat.len()));
    // random bytes should cost little more than a literal pass-through
    assert!(csize >= dat.len());
}

#[test]
fn compression_works() {
    // eleven repeated bytes: one short match plus the reserved tail, must
    // come out below the input size
    let dat = "aaaaaaaaaaa".as_bytes();
    let mut compressed = vec![0u8;max_compressed_length(dat.len())];
    let csize = compress(dat,&mut compressed).expect("compression failed");
    assert_eq!(compressed[0..csize].to_vec(),hex::decode("11610100506161616161").unwrap());
    assert!(csize < dat.len());
    round_trip(dat);
}

#[test]
fn empty_input() {
    let mut compressed = vec![0u8;max_compressed_length(0)];
    let csize = compress(&[],&mut compressed).expect("compression failed");
    assert_eq!(compressed[0..csize].to_vec(),vec![0x00]);
    let mut expanded = [0u8;4];
    assert_eq!(decompress(&compressed[0..csize],&mut expanded),Ok(0));
}

#[test]
fn overlapping_back_reference() {
    // literal 'x', then a distance-1 match of 50: the match reads bytes it
    // is itself producing
    let block = [
        vec![0x1F,b'x',0x01,0x00,31],
        vec![0x50],
        vec![b'y';5]
    ].concat();
    let mut expanded = vec![0u8;56];
    let count = decompress(&block,&mut expanded).expect("expansion failed");
    assert_eq!(count,56);
    assert_eq!(&expanded[0..51],vec![b'x';51].as_slice());
    assert_eq!(&expanded[51..56],b"yyyyy");
}

#[test]
fn truncation_always_fails() {
    for dat in [vec![b'a';11],vec![b'a';500],noise(300,5)] {
        let mut compressed = vec![0u8;max_compressed_length(dat.len())];
        let csize = compress(&dat,&mut compressed).expect("compression failed");
        let mut expanded = vec![0u8;dat.len()];
        for cut in 0..csize {
            assert!(decompress(&compressed[0..cut],&mut expanded).is_err(),"prefix of {} bytes accepted",cut);
        }
    }
}

#[test]
fn bad_distances() {
    // a match before any output exists
    let mut expanded = [0u8;16];
    match decompress(&[0x00,0x05,0x00,0x00],&mut expanded) {
        Err(Error::Malformed(_,reason)) => assert_eq!(reason,"back-reference distance exceeds produced output"),
        other => panic!("expected malformed, got {:?}",other)
    }
    // distance zero is never valid
    assert!(decompress(&[0x10,b'x',0x00,0x00,0x00],&mut expanded).is_err());
}

#[test]
fn output_too_small_is_distinct() {
    let dat = vec![b'z';100];
    let mut compressed = vec![0u8;max_compressed_length(dat.len())];
    let csize = compress(&dat,&mut compressed).expect("compression failed");
    let mut small = [0u8;10];
    assert_eq!(decompress(&compressed[0..csize],&mut small),Err(Error::OutputTooSmall));
}

#[test]
fn undersized_output_rejected() {
    let dat = [0u8;100];
    let mut out = vec![0u8;max_compressed_length(dat.len())-1];
    assert_eq!(compress(&dat,&mut out),
        Err(Error::InvalidArgument("output capacity below max_compressed_length")));
}

#[test]
fn scratch_reuse() {
    let mut scratch = Scratch::new();
    let first = vec![b'm';200];
    let second = noise(200,8);
    for dat in [&first,&second,&first] {
        let mut compressed = vec![0u8;max_compressed_length(dat.len())];
        let csize = compress_with(&mut scratch,dat,&mut compressed).expect("compression failed");
        let mut expanded = vec![0u8;dat.len()];
        decompress(&compressed[0..csize],&mut expanded).expect("expansion failed");
        assert_eq!(&expanded,dat);
    }
}

#[test]
fn range_variants() {
    let dat = b"sing in me muse and through me tell the story sing in me muse";
    let mut padded = vec![0u8;8];
    padded.extend_from_slice(dat);
    let mut compressed = vec![0u8;max_compressed_length(dat.len())+16];
    let csize = compress_range(&padded,8,dat.len(),&mut compressed,16,max_compressed_length(dat.len()))
        .expect("compression failed");
    let mut expanded = vec![0u8;dat.len()];
    let xsize = decompress_range(&compressed,16,csize,&mut expanded,0,dat.len()).expect("expansion failed");
    assert_eq!(xsize,dat.len());
    assert_eq!(&expanded,dat);
    let compressed_len = compressed.len();
    assert_eq!(compress_range(&padded,8,padded.len(),&mut compressed,0,compressed_len),
        Err(Error::InvalidArgument("region exceeds buffer bounds")));
}
