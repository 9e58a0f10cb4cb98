use core::fmt;

/// Raw ESP-IDF error code.
#[allow(non_camel_case_types)]
pub type esp_err_t = i32;

pub const ESP_OK: esp_err_t = 0;
pub const ESP_FAIL: esp_err_t = -1;
pub const ESP_ERR_NO_MEM: esp_err_t = 0x101;
pub const ESP_ERR_INVALID_ARG: esp_err_t = 0x102;
pub const ESP_ERR_INVALID_STATE: esp_err_t = 0x103;
pub const ESP_ERR_INVALID_SIZE: esp_err_t = 0x104;
pub const ESP_ERR_NOT_FOUND: esp_err_t = 0x105;
pub const ESP_ERR_NOT_SUPPORTED: esp_err_t = 0x106;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EspError { pub(crate) code: esp_err_t }

impl EspError {
  pub fn result(code: esp_err_t) -> Result<(), Self> {
    if code == ESP_OK {
      Ok(())
    } else {
      Err(EspError { code })
    }
  }

  pub fn code(&self) -> esp_err_t {
    self.code
  }

  #[cfg(target_os = "espidf")]
  fn name(&self) -> &'static str {
    use std::ffi::CStr;

    unsafe {
      let name = esp_idf_sys::esp_err_to_name(self.code);
      if name.is_null() {
        return "UNKNOWN ERROR";
      }
      CStr::from_ptr(name).to_str().unwrap_or("UNKNOWN ERROR")
    }
  }

  #[cfg(not(target_os = "espidf"))]
  fn name(&self) -> &'static str {
    match self.code {
      ESP_OK => "ESP_OK",
      ESP_FAIL => "ESP_FAIL",
      ESP_ERR_NO_MEM => "ESP_ERR_NO_MEM",
      ESP_ERR_INVALID_ARG => "ESP_ERR_INVALID_ARG",
      ESP_ERR_INVALID_STATE => "ESP_ERR_INVALID_STATE",
      ESP_ERR_INVALID_SIZE => "ESP_ERR_INVALID_SIZE",
      ESP_ERR_NOT_FOUND => "ESP_ERR_NOT_FOUND",
      ESP_ERR_NOT_SUPPORTED => "ESP_ERR_NOT_SUPPORTED",
      _ => "UNKNOWN ERROR",
    }
  }
}

impl From<esp_err_t> for EspError {
  fn from(code: esp_err_t) -> Self {
    EspError { code }
  }
}

impl fmt::Display for EspError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} (0x{:x})", self.name(), self.code)
  }
}

impl std::error::Error for EspError {}

/// Turns an `esp_err_t` returned by an unsafe FFI call into a `Result`.
#[cfg(target_os = "espidf")]
macro_rules! esp_ok {
  ($err:expr) => {{
    let code = unsafe { $err };
    $crate::esp_error::EspError::result(code as $crate::esp_error::esp_err_t)
  }}
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ok_code_is_not_an_error() {
    assert_eq!(EspError::result(ESP_OK), Ok(()));
    assert_eq!(EspError::result(ESP_ERR_NO_MEM), Err(EspError { code: ESP_ERR_NO_MEM }));
  }

  #[test]
  fn display_names_known_codes() {
    assert_eq!(EspError::from(ESP_ERR_INVALID_STATE).to_string(), "ESP_ERR_INVALID_STATE (0x103)");
    assert_eq!(EspError::from(0x7777).to_string(), "UNKNOWN ERROR (0x7777)");
  }
}
