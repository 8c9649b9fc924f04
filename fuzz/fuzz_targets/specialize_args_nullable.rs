#![no_main]
use libfuzzer_sys::fuzz_target;
use zygisk_module::module::abi::AppSpecializeStorage;

fuzz_target!(|data: &[u8]| {
    if data.len() < 9 {
        return;
    }

    // Any subset of optional fields may be missing on a given platform.
    let mask = u32::from(data[0]);
    let uid = i32::from_ne_bytes([data[1], data[2], data[3], data[4]]);
    let new_uid = i32::from_ne_bytes([data[5], data[6], data[7], data[8]]);
    let mut storage = AppSpecializeStorage::with_optional_fields(uid, mask);

    storage.with_args(|args| {
        assert_eq!(args.uid(), uid);
        args.set_uid(new_uid);

        let present = |bit: u32| mask & (1 << bit) != 0;
        assert_eq!(args.is_child_zygote().is_some(), present(0));
        assert_eq!(args.is_top_app().is_some(), present(1));
        assert_eq!(args.pkg_data_info_list().is_some(), present(2));
        assert_eq!(args.whitelisted_data_info_list().is_some(), present(3));
        assert_eq!(args.mount_data_dirs().is_some(), present(4));
        assert_eq!(args.mount_storage_dirs().is_some(), present(5));

        for (i, byte) in data[9..].iter().enumerate() {
            let value = byte & 1 != 0;
            let landed = match i % 4 {
                0 => args.set_is_child_zygote(value),
                1 => args.set_is_top_app(value),
                2 => args.set_mount_data_dirs(value),
                _ => args.set_mount_storage_dirs(value),
            };
            let bit = [0, 1, 4, 5][i % 4];
            assert_eq!(landed, present(bit));
        }
    });

    assert_eq!(storage.uid, new_uid);
});
