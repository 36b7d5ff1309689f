// SPDX-License-Identifier: LGPL-3.0-or-later

//! A minimal end-to-end walkthrough: write a handful of typed records to a
//! fresh BDIO file, close it, then reopen it for reading and seek through
//! every record. Run with: cargo run --example roundtrip.

use bdio::{Bdio, Format, Mode};

fn main() -> bdio::Result<()> {
    env_logger::init();

    let path = std::env::temp_dir().join("bdio_roundtrip_demo.bdio");

    let x: [i32; 5] = [1, 2, 3, 4, 5];
    let y: [f64; 5] = [1.0, 0.5, 0.25, 0.125, 0.0625];

    let mut fh = Bdio::open(&path, Mode::Write, Some("demos/roundtrip"))?;

    fh.start_record(Format::BinInt32, 0)?;
    let mut x_bytes = [0u8; 20];
    for (chunk, v) in x_bytes.chunks_exact_mut(4).zip(x) {
        chunk.copy_from_slice(&v.to_ne_bytes());
    }
    fh.write_i32(&mut x_bytes);

    fh.start_record(Format::BinF64, 0)?;
    let mut y_bytes = [0u8; 40];
    for (chunk, v) in y_bytes.chunks_exact_mut(8).zip(y) {
        chunk.copy_from_slice(&v.to_ne_bytes());
    }
    fh.write_f64(&mut y_bytes);

    fh.close()?;

    let mut fh = Bdio::open(&path, Mode::Read, Some("demos/roundtrip"))?;
    while fh.seek_record()? {
        println!(
            "record: format={:?} uinfo={} payload_len={}",
            fh.rfmt(),
            fh.ruinfo(),
            fh.rlen()
        );
        let mut buf = vec![0u8; fh.rlen() as usize];
        fh.read(&mut buf);
    }

    std::fs::remove_file(&path).ok();
    Ok(())
}
