mod common;

use std::thread;

use common::{ints, session, sum3};

#[test]
fn concurrent_requests_compile_once() {
    let session = session([sum3()]);
    let programs: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| session.compile("sum3").unwrap()))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });
    assert_eq!(session.compile_count(), 1);
    assert!(
        programs
            .windows(2)
            .all(|pair| std::sync::Arc::ptr_eq(&pair[0], &pair[1]))
    );
}

#[test]
fn compiled_programs_run_on_many_threads() {
    let session = session([sum3()]);
    thread::scope(|scope| {
        for offset in 0..4 {
            let session = &session;
            scope.spawn(move || {
                let result = session
                    .run("sum3", ints(session, &[offset, offset, offset]))
                    .unwrap();
                assert_eq!(result.as_int(), Some(3 * offset));
            });
        }
    });
    assert_eq!(session.compile_count(), 1);
}

#[test]
fn invalidated_programs_are_rebuilt() {
    let session = session([sum3()]);
    let before = session.compile("sum3").unwrap();
    session.invalidate("sum3");
    let after = session.compile("sum3").unwrap();
    assert!(!std::sync::Arc::ptr_eq(&before, &after));
    assert_eq!(session.compile_count(), 2);
}
