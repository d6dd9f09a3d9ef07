use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use p1_rs::p1::telegram::{milli_units, parse_telegram};

const TELEGRAM: &[&str] = &[
    "/ISk5\\2ME382-1003",
    "",
    "0-0:96.1.1(4B414C37303035313039343432353133)",
    "1-0:1.8.1(00123.456*kWh)",
    "1-0:1.8.2(00234.567*kWh)",
    "1-0:2.8.1(00000.000*kWh)",
    "1-0:2.8.2(00000.000*kWh)",
    "0-0:96.14.0(0002)",
    "1-0:1.7.0(0000.32*kW)",
    "1-0:2.7.0(0000.00*kW)",
    "0-0:17.0.0(0999.00*kW)",
    "0-0:96.3.10(1)",
    "0-0:96.13.1()",
    "0-0:96.13.0()",
    "0-1:24.1.0(3)",
    "0-1:96.1.0(3238303131303038333036343239313133)",
    "0-1:24.3.0(131117140000)(00)(60)(1)(0-1:24.2.1)(m3)",
    "(00012.345)",
    "0-1:24.4.0(1)",
    "!",
];

fn benchmark_parse_telegram(c: &mut Criterion) {
    let ts = NaiveDate::from_ymd_opt(2013, 11, 17)
        .unwrap()
        .and_hms_opt(14, 5, 0)
        .unwrap();

    c.bench_function("parse_telegram", |b| {
        b.iter(|| {
            let reading = parse_telegram(black_box(TELEGRAM), true, ts);
            let _ = black_box(reading);
        })
    });

    c.bench_function("milli_units", |b| {
        b.iter(|| {
            let _ = black_box(milli_units(black_box("00123.456")));
        })
    });
}

criterion_group!(benches, benchmark_parse_telegram);
criterion_main!(benches);
