pub use std::collections::BTreeMap;

// Literal constructors for the Option<BTreeMap<String, String>> shape that
// metadata labels/annotations take in k8s-openapi.

#[macro_export]
macro_rules! klabel {
    ($($key:expr => $val:expr),+$(,)?) => {
        Some($crate::macros::BTreeMap::from([$(($key.to_string(), $val.to_string())),+]))
    };
}

#[macro_export]
macro_rules! kanno {
    ($($key:expr => $val:expr),+$(,)?) => {
        Some($crate::macros::BTreeMap::from([$(($key.to_string(), $val.to_string())),+]))
    };
}

#[macro_export]
macro_rules! kanno_insert {
    ($obj:expr, $($key:expr => $val:expr),+$(,)?) => {
        $($obj.annotations_mut().insert($key.to_string(), $val.to_string());)+
    };
}

pub use {
    kanno,
    kanno_insert,
    klabel,
};
