use porthole_core::Config;
use porthole_engine::find_chrome_binary;

/// Run environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env();

    println!();
    println!("🩺 porthole doctor — Environment Diagnostics");
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Browser engine ---
    println!("🌐 Browser engine");
    match find_chrome_binary(config.chrome_bin.as_deref()) {
        Some(path) => {
            print_ok("Chrome/Chromium binary found", &path);
            ok_count += 1;
        }
        None => {
            print_err(
                "No Chrome/Chromium binary found",
                "Install Chrome or set CHROME_BIN to an explicit path",
            );
            err_count += 1;
        }
    }
    if let Some(explicit) = &config.chrome_bin {
        println!("  CHROME_BIN override: {}", explicit);
    }
    println!();

    // --- 2. Search upstream ---
    println!("🔎 Search upstream");
    match (&config.search_api_key, &config.search_cx) {
        (Some(_), Some(_)) => {
            print_ok("Google CSE credentials configured", "");
            ok_count += 1;
        }
        _ => {
            print_warn(
                "Search credentials not configured",
                "internal://search will serve the fallback page (set GOOGLE_CSE_API_KEY and GOOGLE_CSE_CX)",
            );
            warn_count += 1;
        }
    }
    println!();

    // --- 3. Configuration ---
    println!("📋 Configuration");
    println!("  Bind address:      {}:{}", config.host, config.port);
    println!("  Session TTL:       {}s", config.session_ttl_seconds);
    println!("  Tab TTL:           {}s", config.tab_ttl_seconds);
    println!("  Cleanup interval:  {}s", config.cleanup_interval_seconds);
    println!(
        "  Stream:            {:.1} fps, JPEG quality {}",
        config.stream_fps, config.stream_jpeg_quality
    );
    println!();

    // --- Summary ---
    println!("================================");
    println!(
        "Summary: {} ok, {} warnings, {} errors",
        ok_count, warn_count, err_count
    );
    if err_count > 0 {
        println!("❌ Fix the errors above before starting the gateway.");
    } else if warn_count > 0 {
        println!("⚠️  Ready, with warnings.");
    } else {
        println!("✅ All checks passed.");
    }
    println!();

    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {}: {}", label, detail);
    }
}

fn print_warn(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {}: {}", label, detail);
    }
}

fn print_err(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {}: {}", label, detail);
    }
}
