use std::env;
use std::path::PathBuf;
use std::process::{Command, Output};

fn command_warnings(section: &str, command_result: &std::io::Result<Output>) {
    let output = match command_result {
        Ok(output) => output,
        Err(e) => panic!("[{section}] unable to run: {e:?}"),
    };

    if !output.stdout.is_empty() {
        println!(
            "cargo:warning=[{section}]{}",
            String::from_utf8_lossy(&output.stdout)
        );
    }

    if !output.status.success() || !output.stderr.is_empty() {
        panic!("[{section}] {}", String::from_utf8_lossy(&output.stderr));
    }
}

fn main() {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/bpf/drop.bpf.c");

    // 1: Compile the XDP drop program to LLVM IR.
    // clang -S -target bpf -Wall -Werror -emit-llvm -c -g -O2 -o drop.bpf.ll drop.bpf.c
    let ir_target = out_dir.join("drop.bpf.ll");
    let compile_result = Command::new("clang")
        .current_dir("src/bpf")
        .args([
            "-S",
            "-target",
            "bpf",
            "-Wall",
            "-Wno-unused-value",
            "-Wno-unused-parameter",
            "-Werror",
            "-emit-llvm",
            "-c",
            "-g",
            "-O2",
            "-o",
        ])
        .arg(&ir_target)
        .arg("drop.bpf.c")
        .output();
    command_warnings("clang", &compile_result);

    // 2: Lower the IR into the BPF object that xdp.rs embeds.
    // llc -march=bpf -filetype=obj -o drop.bpf.o drop.bpf.ll
    let object_target = out_dir.join("drop.bpf.o");
    let link_result = Command::new("llc")
        .args(["-march=bpf", "-filetype=obj", "-o"])
        .arg(&object_target)
        .arg(&ir_target)
        .output();
    command_warnings("llc", &link_result);

    // 3: Kernel ethtool ABI used by ethtool.rs.
    let bindings = bindgen::Builder::default()
        .header_contents(
            "wrapper.h",
            "#include <linux/ethtool.h>\n#include <linux/sockios.h>\n#include <linux/if.h>",
        )
        .allowlist_type("ethtool_ringparam")
        .allowlist_type("ethtool_rxfh_indir")
        .allowlist_type("ifreq")
        .allowlist_var("IFNAMSIZ")
        .allowlist_var("SIOCETHTOOL")
        .allowlist_var("ETHTOOL_GRINGPARAM")
        .allowlist_var("ETHTOOL_SRINGPARAM")
        .allowlist_var("ETHTOOL_GRXFHINDIR")
        .allowlist_var("ETHTOOL_SRXFHINDIR")
        .derive_default(true)
        .generate()
        .expect("Unable to generate ethtool bindings");

    bindings
        .write_to_file(out_dir.join("bindings.rs"))
        .expect("Couldn't write bindings!");
}
