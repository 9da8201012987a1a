// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Activate a single logical volume by name. Intended to be run from an
//! initramfs init script once the underlying PVs are expected to be visible.

use std::process::ExitCode;

use clap::Parser;
use log::error;
use lvmboot::Context;

#[derive(Parser)]
#[command(name = "lvm-lv-activate", about = "Activate one LVM2 logical volume")]
struct Args {
    /// Volume group name
    vgname: String,
    /// Logical volume name within that group
    lvname: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut ctx = Context::init();

    if !ctx.scan() {
        error!("lvm-lv-activate: failed to scan volume groups, {}", ctx.errmsg());
        ctx.quit();
        return ExitCode::FAILURE;
    }

    let vg = match ctx.open_vg(&args.vgname) {
        Some(vg) => vg,
        None => {
            error!("lvm-lv-activate: failed to open volume group {}, {}", args.vgname, ctx.errmsg());
            ctx.quit();
            return ExitCode::FAILURE;
        }
    };

    let lv = match vg.lookup_lv(&args.lvname) {
        Some(lv) => lv,
        None => {
            error!(
                "lvm-lv-activate: failed to open logical volume {}/{}, {}",
                args.vgname, args.lvname, ctx.errmsg()
            );
            ctx.quit();
            return ExitCode::FAILURE;
        }
    };

    if !ctx.activate_lv(&lv) {
        error!(
            "lvm-lv-activate: failed to activate logical volume {}/{}, {}",
            args.vgname, args.lvname, ctx.errmsg()
        );
        ctx.quit();
        return ExitCode::FAILURE;
    }

    ctx.quit();
    ExitCode::SUCCESS
}
