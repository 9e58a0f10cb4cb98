use std::env;

fn main() {
  println!("cargo:rerun-if-changed=build.rs");
  println!("cargo:rerun-if-env-changed=HEAP_DEMO_VARIANT");

  // ESP-IDF link arguments only matter when building for the device.
  if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
    embuild::espidf::sysenv::output();
  }
}
