use director_core::ctx::Context;
use std::os::raw::c_int;

/// Cancel `ctx` on the first SIGINT/SIGTERM/SIGQUIT.
pub fn setup_signal_handler(ctx: Context) -> anyhow::Result<()> {
    use signal_hook::consts::*;
    use signal_hook::iterator::exfiltrator::WithOrigin;
    use signal_hook::iterator::SignalsInfo;

    fn named_signal(sig: c_int) -> String {
        signal_hook::low_level::signal_name(sig)
            .map(|n| format!("{}({})", n, sig))
            .unwrap_or_else(|| sig.to_string())
    }

    let mut signals = SignalsInfo::<WithOrigin>::new(TERM_SIGNALS)?;
    std::thread::spawn(move || {
        if let Some(info) = signals.forever().next() {
            let from = if let Some(p) = info.process {
                format!("(pid: {}, uid: {})", p.pid, p.uid)
            } else {
                "unknown".to_string()
            };
            log::info!(
                "{} recved, from: {}, cause: {:?}",
                named_signal(info.signal),
                from,
                info.cause
            );
            log::info!("waiting for running tools to be killed...");
            ctx.cancel();
        }
    });
    Ok(())
}

/// Seconds as an optional duration, with 0 meaning none.
pub fn secs(n: u64) -> Option<std::time::Duration> {
    if n == 0 {
        None
    } else {
        Some(std::time::Duration::from_secs(n))
    }
}
