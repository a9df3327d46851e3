use std::path::PathBuf;
use std::time::Duration;

use panel::packet::Record;
use panel::source::{Next, PacketSource};

#[allow(dead_code)]
pub const TIMEOUT: Duration = Duration::from_millis(20);

pub fn fixture_path(name: &str) -> PathBuf {
    let mut path =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    path.push("tests/fixtures");
    path.push(name);
    path
}

/// Read records until the source goes idle twice in a row or ends.
#[allow(dead_code)]
pub fn drain<S: PacketSource>(source: &mut S) -> Vec<Record> {
    let mut records = Vec::new();
    let mut idle = 0;
    while idle < 2 {
        match source.read().expect("read should not fail") {
            Next::Record(rec) => {
                idle = 0;
                records.push(rec);
            }
            Next::Idle => idle += 1,
            Next::End => break,
        }
    }
    records
}
