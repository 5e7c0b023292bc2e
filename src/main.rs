use clap::{arg,crate_version,Command};
use rawpress::{lz4,inflate};
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const RCH: &str = "unreachable was reached";

/// LZ4 files written by this tool carry the expanded length up front so the
/// exact output buffer can be sized before expanding.  This framing belongs
/// to the tool, not to the block codec.
const LZ4_HEADER: usize = 4;

fn ok_to_overwrite(path_out: &str) -> bool {
    if let Ok(_f) = std::fs::File::open(path_out) {
        let mut ans = String::new();
        eprint!("{} exists, overwrite? (y/n) ",path_out);
        std::io::stdin().read_line(&mut ans).expect("could not read stdin");
        if ans.trim_end()=="y" || ans.trim_end()=="Y" {
            return true;
        }
        return false;
    }
    true
}

/// expand a raw DEFLATE stream, growing the output on demand since the
/// stream does not declare its expanded size
fn expand_deflate(dat: &[u8]) -> Result<Vec<u8>,rawpress::Error> {
    let mut capacity = std::cmp::max(64,dat.len()*4);
    loop {
        let mut buf = vec![0;capacity];
        match inflate::decompress(dat,&mut buf) {
            Ok(count) => {
                buf.truncate(count);
                return Ok(buf);
            },
            Err(rawpress::Error::OutputTooSmall) => {
                log::debug!("{} bytes of output was not enough, doubling",capacity);
                capacity *= 2;
            },
            Err(e) => {
                return Err(e);
            }
        }
    }
}

fn main() -> STDRESULT
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let long_help =
"Examples:
---------
Compress:      `rawpress compress -m lz4 -i my_file -o my_file.lz4`
Expand:        `rawpress expand -m lz4 -i my_file.lz4 -o my_file`
Expand:        `rawpress expand -m inflate -i my_file.defl -o my_file`";

    let mut main_cmd = Command::new("rawpress")
        .about("Compress and expand with raw block codecs")
        .after_long_help(long_help)
        .version(crate_version!());
    main_cmd = main_cmd.subcommand(Command::new("compress")
        .arg(arg!(-m --method <METHOD> "compression algorithm").value_parser(["lz4"])
            .required(true))
        .arg(arg!(-i --input <PATH> "input path").required(true))
        .arg(arg!(-o --output <PATH> "output path").required(true))
        .about("compress a file"));

    main_cmd = main_cmd.subcommand(Command::new("expand")
        .arg(arg!(-m --method <METHOD> "compression algorithm").value_parser(["lz4","inflate"])
            .required(true))
        .arg(arg!(-i --input <PATH> "input path").required(true))
        .arg(arg!(-o --output <PATH> "output path").required(true))
        .about("expand a file"));

    let matches = main_cmd.get_matches();

    if let Some(cmd) = matches.subcommand_matches("compress") {
        let path_in = cmd.get_one::<String>("input").expect(RCH);
        let path_out = cmd.get_one::<String>("output").expect(RCH);
        let method = cmd.get_one::<String>("method").expect(RCH);
        if !ok_to_overwrite(path_out) {
            eprintln!("abort operation");
            return Ok(());
        }
        let dat = std::fs::read(path_in)?;
        let compressed = match method.as_str() {
            "lz4" => {
                let mut buf = vec![0;LZ4_HEADER + lz4::max_compressed_length(dat.len())];
                buf[0..LZ4_HEADER].copy_from_slice(&u32::to_le_bytes(dat.len() as u32));
                let count = lz4::compress(&dat,&mut buf[LZ4_HEADER..])?;
                buf.truncate(LZ4_HEADER + count);
                buf
            },
            _ => {
                eprintln!("{} not supported",method);
                return Err(Box::new(std::fmt::Error));
            }
        };
        std::fs::write(path_out,&compressed)?;
        eprintln!("compressed {} into {}",dat.len(),compressed.len());
    }

    if let Some(cmd) = matches.subcommand_matches("expand") {
        let path_in = cmd.get_one::<String>("input").expect(RCH);
        let path_out = cmd.get_one::<String>("output").expect(RCH);
        let method = cmd.get_one::<String>("method").expect(RCH);
        if !ok_to_overwrite(path_out) {
            eprintln!("abort operation");
            return Ok(());
        }
        let dat = std::fs::read(path_in)?;
        let expanded = match method.as_str() {
            "lz4" => {
                if dat.len() < LZ4_HEADER {
                    return Err(Box::new(rawpress::Error::Truncated(dat.len())));
                }
                let expanded_size = u32::from_le_bytes([dat[0],dat[1],dat[2],dat[3]]) as usize;
                let mut buf = vec![0;expanded_size];
                let count = lz4::decompress(&dat[LZ4_HEADER..],&mut buf)?;
                if count != expanded_size {
                    log::warn!("header declared {} bytes but block held {}",expanded_size,count);
                }
                buf.truncate(count);
                buf
            },
            "inflate" => expand_deflate(&dat)?,
            _ => {
                eprintln!("{} not supported",method);
                return Err(Box::new(std::fmt::Error));
            }
        };
        std::fs::write(path_out,&expanded)?;
        eprintln!("expanded {} into {}",dat.len(),expanded.len());
    }

    Ok(())
}
