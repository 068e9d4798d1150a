fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-env-changed=HYBRID_PT_BUILD_STAMP");

    // Reproducible builds pin the clock
    let now = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| time::OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(time::OffsetDateTime::now_utc);

    let stamp = std::env::var("HYBRID_PT_BUILD_STAMP").unwrap_or_else(|_| {
        time::format_description::parse("[month repr:short] [day padding:space] [year] [hour]:[minute]:[second]")
            .ok()
            .and_then(|fmt| now.format(&fmt).ok())
            .unwrap_or_else(|| "unknown".to_string())
    });

    println!("cargo:rustc-env=HYBRID_PT_BUILD_STAMP={}", stamp);
}
