use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*;
use std::path::Path;
use std::process::Command; // Run programs
use tempfile;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

/// compress a reference file through the CLI, expand the result, and demand
/// the round trip reproduce the original bytes
fn round_trip_test(base_name: &str,method: &str) -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = Path::new("tests").join([base_name,".txt"].concat());
    let packed_path = temp_dir.path().join([base_name,".",method].concat());
    let out_path = temp_dir.path().join([base_name,".txt"].concat());
    let mut cmd = Command::cargo_bin("rawpress")?;
    cmd.arg("compress")
        .arg("-m").arg(method)
        .arg("-i").arg(&in_path)
        .arg("-o").arg(&packed_path)
        .assert()
        .success();
    let mut cmd = Command::cargo_bin("rawpress")?;
    cmd.arg("expand")
        .arg("-m").arg(method)
        .arg("-i").arg(&packed_path)
        .arg("-o").arg(&out_path)
        .assert()
        .success();
    match (std::fs::read(in_path),std::fs::read(out_path)) {
        (Ok(v1),Ok(v2)) => {
            assert_eq!(v1,v2);
        },
        _ => panic!("unable to compare output with reference")
    }
    Ok(())
}

#[test]
fn lz4_round_trip() -> STDRESULT {
    round_trip_test("sonnet","lz4")
}

#[test]
fn inflate_expansion() -> STDRESULT {
    // sonnet.defl is a raw DEFLATE stream of sonnet.txt produced by zlib
    let temp_dir = tempfile::tempdir()?;
    let in_path = Path::new("tests").join("sonnet.defl");
    let cmp_path = Path::new("tests").join("sonnet.txt");
    let out_path = temp_dir.path().join("sonnet.txt");
    let mut cmd = Command::cargo_bin("rawpress")?;
    cmd.arg("expand")
        .arg("-m").arg("inflate")
        .arg("-i").arg(&in_path)
        .arg("-o").arg(&out_path)
        .assert()
        .success();
    match (std::fs::read(cmp_path),std::fs::read(out_path)) {
        (Ok(v1),Ok(v2)) => {
            assert_eq!(v1,v2);
        },
        _ => panic!("unable to compare output with reference")
    }
    Ok(())
}

#[test]
fn inflate_cannot_compress() -> STDRESULT {
    // the DEFLATE side of the crate is expansion only
    let temp_dir = tempfile::tempdir()?;
    let in_path = Path::new("tests").join("sonnet.txt");
    let out_path = temp_dir.path().join("sonnet.defl");
    let mut cmd = Command::cargo_bin("rawpress")?;
    cmd.arg("compress")
        .arg("-m").arg("inflate")
        .arg("-i").arg(&in_path)
        .arg("-o").arg(&out_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
    Ok(())
}

#[test]
fn corrupt_lz4_file_fails() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = Path::new("tests").join("sonnet.txt");
    let packed_path = temp_dir.path().join("sonnet.lz4");
    let out_path = temp_dir.path().join("sonnet.txt");
    let mut cmd = Command::cargo_bin("rawpress")?;
    cmd.arg("compress")
        .arg("-m").arg("lz4")
        .arg("-i").arg(&in_path)
        .arg("-o").arg(&packed_path)
        .assert()
        .success();
    // lop off the tail of the block
    let packed = std::fs::read(&packed_path)?;
    std::fs::write(&packed_path,&packed[0..packed.len()-3])?;
    let mut cmd = Command::cargo_bin("rawpress")?;
    cmd.arg("expand")
        .arg("-m").arg("lz4")
        .arg("-i").arg(&packed_path)
        .arg("-o").arg(&out_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Truncated"));
    Ok(())
}
