use std::env;

fn main() {
  println!("cargo:rerun-if-changed=build.rs");
  println!(r#"cargo:rustc-check-cfg=cfg(target_device, values("esp32", "esp32s2", "esp32s3", "esp32c3", "esp32c6"))"#);

  let target = env::var("TARGET").expect("TARGET not set");

  let target_device = match target.as_ref() {
    "xtensa-esp32-espidf" => "esp32",
    "xtensa-esp32s2-espidf" => "esp32s2",
    "xtensa-esp32s3-espidf" => "esp32s3",
    "riscv32imc-esp-espidf" => "esp32c3",
    "riscv32imac-esp-espidf" => "esp32c6",
    _ => return,
  };

  println!(r#"cargo:rustc-cfg=target_device="{}""#, target_device);
}
