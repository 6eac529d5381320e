use std::thread::sleep;
use std::time::Duration;

use super::time::now_millis;

#[test]
fn test_now_millis_moves_forward() {
    let t1 = now_millis();
    sleep(Duration::from_millis(10));
    let t2 = now_millis();

    assert!(t2 > t1);
    assert!(t2 - t1 >= 10);
}

#[test]
fn test_now_millis_is_recent() {
    // Greater than 2021-01-01 in milliseconds
    assert!(now_millis() > 1_609_459_200_000);
}
