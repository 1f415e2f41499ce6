//! Synthetic call records for scenario tests.

use crate::{BuildSession, Outcome};
use common::{ArgValue, BuildConfig, Call, ProcessRef};

pub const PID: u32 = 1337;

pub fn process() -> ProcessRef {
    ProcessRef {
        pid: PID,
        executable: r"C:\Users\lab\sample.exe".into(),
        command: r#""C:\Users\lab\sample.exe" --stage 2"#.into(),
    }
}

pub fn session() -> BuildSession {
    let mut config = BuildConfig::default();
    config.host.name = "SANDBOX".into();
    BuildSession::new(&config).expect("default config is valid")
}

/// Ingests a call that must be applied.
pub fn ingest(session: &mut BuildSession, call: Call) {
    let name = call.name.clone();
    let outcome = session
        .ingest(&call)
        .unwrap_or_else(|e| panic!("{name} failed: {e}"));
    assert_eq!(outcome, Outcome::Applied, "{name} was not applied");
}

fn call(name: &str) -> Call {
    Call::new(name, process())
}

fn handle(value: u64) -> i64 {
    value as i64
}

pub fn socket(h: u64, af: i64, kind: i64, protocol: i64) -> Call {
    call("socket")
        .arg("socket", handle(h))
        .arg("af", af)
        .arg("type", kind)
        .arg("protocol", protocol)
}

pub fn bind(h: u64, ip: &str, port: i64) -> Call {
    call("bind")
        .arg("socket", handle(h))
        .arg("ip_address", ip)
        .arg("port", port)
}

pub fn connect(h: u64, ip: &str, port: i64) -> Call {
    call("connect")
        .arg("s", handle(h))
        .arg("ip_address", ip)
        .arg("port", port)
}

pub fn listen(h: u64) -> Call {
    call("listen").arg("socket", handle(h))
}

pub fn accept(h: u64, child: u64, ip: &str, port: i64) -> Call {
    call("accept")
        .arg("socket", handle(h))
        .arg("ip_address", ip)
        .arg("port", port)
        .returning(handle(child))
}

pub fn send(h: u64, buffer: &str) -> Call {
    call("send").arg("socket", handle(h)).arg("buffer", buffer)
}

pub fn recv(h: u64, buffer: &str) -> Call {
    call("recv").arg("socket", handle(h)).arg("buffer", buffer)
}

pub fn shutdown(h: u64) -> Call {
    call("shutdown").arg("socket", handle(h))
}

pub fn closesocket(h: u64) -> Call {
    call("closesocket").arg("socket", handle(h))
}

pub fn open_key(h: u64, path: &str) -> Call {
    call("RegOpenKeyExW")
        .arg("key_handle", handle(h))
        .arg("regkey", path)
}

pub fn enum_key(h: u64, name: &str) -> Call {
    call("RegEnumKeyExW")
        .arg("key_handle", handle(h))
        .arg("key_name", name)
}

pub fn close_key(h: u64) -> Call {
    call("RegCloseKey").arg("key_handle", handle(h))
}

pub fn delete_key(h: u64, path: &str) -> Call {
    call("RegDeleteKeyW")
        .arg("key_handle", handle(h))
        .arg("regkey", path)
}

pub fn set_value(h: u64, path: &str, reg_type: &str, value: impl Into<ArgValue>) -> Call {
    call("RegSetValueExW")
        .arg("key_handle", handle(h))
        .arg("regkey", path)
        .arg("value", value)
        .flag("reg_type", reg_type)
}

pub fn query_value(h: u64, path: &str, reg_type: &str, value: impl Into<ArgValue>) -> Call {
    call("RegQueryValueExW")
        .arg("key_handle", handle(h))
        .arg("regkey", path)
        .arg("value", value)
        .flag("reg_type", reg_type)
}

pub fn delete_value(h: u64, path: &str) -> Call {
    call("RegDeleteValueW")
        .arg("key_handle", handle(h))
        .arg("regkey", path)
}
