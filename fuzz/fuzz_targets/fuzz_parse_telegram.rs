#![no_main]

use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;
use p1_rs::p1::telegram::{milli_units, parse_telegram, TelegramBuffer};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let lines: Vec<&str> = text.lines().collect();
    let ts = NaiveDate::from_ymd_opt(2013, 11, 17)
        .unwrap()
        .and_hms_opt(14, 5, 0)
        .unwrap();

    // Must never panic, whatever the gas setting
    let first = parse_telegram(&lines, true, ts);
    let _ = parse_telegram(&lines, false, ts);

    // Parsing is a pure function of its input
    let second = parse_telegram(&lines, true, ts);
    assert_eq!(first.is_ok(), second.is_ok());
    if let (Ok(a), Ok(b)) = (first, second) {
        assert_eq!(a, b);
    }

    for line in &lines {
        let _ = milli_units(line);
    }

    let mut buffer = TelegramBuffer::new();
    for line in &lines {
        let _ = buffer.push(line.to_string());
    }
});
