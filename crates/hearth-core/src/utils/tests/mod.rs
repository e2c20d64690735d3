
use crate::utils::panic_message;

#[test]
fn test_panic_message_variants() {
    let payload = std::panic::catch_unwind(|| -> () { panic!("static message") }).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "static message");

    let payload = std::panic::catch_unwind(|| -> () { panic!("formatted {}", 42) }).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "formatted 42");

    let payload = std::panic::catch_unwind(|| -> () { std::panic::panic_any(7u8) }).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
}
