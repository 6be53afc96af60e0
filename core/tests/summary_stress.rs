// Concurrency stress over one folder summary: workers fetch, mutate, save,
// unload and re-fetch overlapping UIDs. Guards against deadlocks and torn
// reads.

mod common;

use std::sync::Arc;
use std::thread;

use common::{add_messages, get_folder, new_store, Msg};
use schedario_core::Folder;
use schedario_core::flags;

const N_REPEATS: u32 = 100;

#[test]
fn simultaneous_read_write_stress() {
    let (_dir, store) = new_store("stress-store");
    let f1 = get_folder(&store, "f1");
    add_messages(&store, &f1, &[
        Msg { uid: "11", subject: "s11", flags: flags::SEEN, ..Default::default() },
        Msg { uid: "12", subject: "s12", ..Default::default() },
        Msg { uid: "13", subject: "s13", ..Default::default() },
    ]);

    let worker = |uid: &'static str, contended: bool| {
        let summary = Arc::clone(f1.summary());
        thread::spawn(move || {
            for i in 0..N_REPEATS {
                let info = summary.get(uid).expect("info loads");
                assert_eq!(info.uid(), uid);
                info.set_size(i);

                summary.save().expect("save succeeds");

                let info = summary.get(uid).expect("info reloads");
                assert_eq!(info.uid(), uid);
                if !contended {
                    assert_eq!(info.size(), i);
                }

                summary.unload_uid(uid);

                let info = summary.get(uid).expect("info reloads after unload");
                assert_eq!(info.uid(), uid);
                if !contended {
                    assert_eq!(info.size(), i);
                }
            }
        })
    };

    // two workers share uid 11, so their sizes interleave
    let handles = vec![
        worker("11", true),
        worker("12", false),
        worker("13", false),
        worker("11", true),
    ];
    for handle in handles {
        handle.join().expect("worker did not panic");
    }

    // every entry is still consistent afterwards
    for uid in ["11", "12", "13"] {
        let info = f1.summary().get(uid).unwrap();
        assert_eq!(info.uid(), uid);
    }
    assert_eq!(f1.summary().saved_count(), 3);
}
