macro_rules! illegal_data {
    ($e:expr) => {
        return Err($crate::error::Error::IllegalData(($e).to_string()))
    };
    ($fmt:expr, $($arg:tt)+) => {
        return Err($crate::error::Error::IllegalData(format!($fmt, $($arg)+)))
    };
}

macro_rules! data_format {
    ($e:expr) => {
        return Err($crate::error::Error::DataFormat(($e).to_string()))
    };
    ($fmt:expr, $($arg:tt)+) => {
        return Err($crate::error::Error::DataFormat(format!($fmt, $($arg)+)))
    };
}

macro_rules! corrupt_cabinet {
    ($e:expr) => {
        return Err($crate::error::Error::CorruptCabinet(($e).to_string()))
    };
    ($fmt:expr, $($arg:tt)+) => {
        return Err($crate::error::Error::CorruptCabinet(format!($fmt, $($arg)+)))
    };
}

macro_rules! invalid_input {
    ($e:expr) => {
        return Err(::std::io::Error::new(::std::io::ErrorKind::InvalidInput, $e))
    };
    ($fmt:expr, $($arg:tt)+) => {
        return Err(::std::io::Error::new(::std::io::ErrorKind::InvalidInput, format!($fmt, $($arg)+)))
    };
}

macro_rules! not_found {
    ($e:expr) => {
        return Err($crate::error::Error::Io(::std::io::Error::new(::std::io::ErrorKind::NotFound, $e)))
    };
    ($fmt:expr, $($arg:tt)+) => {
        return Err($crate::error::Error::Io(::std::io::Error::new(::std::io::ErrorKind::NotFound, format!($fmt, $($arg)+))))
    };
}
