#![no_main]
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;
use zygisk_module::module::ipc::protocol::{read_ack, read_module_index};

fuzz_target!(|data: &[u8]| {
    // Daemon side: whatever a client sends, decoding never panics
    let index = read_module_index(&mut Cursor::new(data));
    if data.len() >= 4 {
        assert!(index.is_ok());
    } else {
        assert!(index.is_err());
    }

    // Client side: short or garbage replies read as a refusal
    let _ = read_ack(&mut Cursor::new(data));
});
