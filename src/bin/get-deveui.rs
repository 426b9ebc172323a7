//! Print LoRaWAN DevEUI candidates derived from the network adapters.
//!
//! ```bash
//! get-deveui        # linked adapters only
//! get-deveui all    # every non-loopback adapter with a link-layer address
//! ```
//!
//! Each adapter is printed as a status comment followed by a C array
//! declaration ready to paste into a sketch:
//!
//! ```text
//! // eth0 Up Linked
//! static const u1_t PROGMEM DEVEUI[8]={ 0xb8, 0x27, 0xeb, 0x12, 0x34, 0x56, 0x00, 0x00 }; // eth0
//! ```

use lmic_raspi::identity::{list_interfaces, SysfsInterfaces};

/// `all` (or anything starting with it, any case) as the only argument.
fn wants_all(args: &[String]) -> bool {
    match args {
        [_, flag] => flag
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("all")),
        _ => false,
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    let all = wants_all(&args);
    if !all {
        let program = args.first().map(String::as_str).unwrap_or("get-deveui");
        println!("Use \"{} all\" to see all interfaces and details", program);
    }

    match list_interfaces(&SysfsInterfaces::new(), all) {
        Ok(reports) => {
            for report in reports {
                println!("{}", report.status_line());
                println!("{}", report.source_literal());
            }
        }
        Err(e) => eprintln!("interface enumeration failed: {}", e),
    }
}
