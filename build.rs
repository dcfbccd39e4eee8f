fn main() {
    if !(cfg!(target_os = "windows") && cfg!(target_arch = "x86")) {
        panic!(
            "{} debugs 32-bit Windows targets and must itself be built for i686-pc-windows-msvc \
             (or -gnu); the Win32 debug API this crate drives is only available there.",
            env!("CARGO_PKG_NAME")
        );
    }
}
