// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

fn main() {
    println!(r#"cargo:rustc-check-cfg=cfg(cooprt_sim_irq)"#);
    println!("cargo:rerun-if-changed=build.rs");

    match std::env::var("TARGET").unwrap().as_str() {
        "thumbv6m-none-eabi"
        | "thumbv7m-none-eabi"
        | "thumbv7em-none-eabi"
        | "thumbv7em-none-eabihf"
        | "thumbv8m.base-none-eabi"
        | "thumbv8m.main-none-eabi"
        | "thumbv8m.main-none-eabihf" => {
            // Real PRIMASK, real SysTick. Nothing to turn on.
        }
        t if t.contains("-none") => {
            panic!("unknown bare-metal target {}, update build.rs", t);
        }
        _ => {
            // Hosted target: interrupt masking is simulated so the core can be
            // exercised in tests and simulations.
            println!("cargo:rustc-cfg=cooprt_sim_irq");
        }
    }
}
