/// implement [Value](crate::objects::Value) for primitive integers
///
/// the raw form of any integer is its 32 bit sign or zero extension, which is what the drive expects in write requests
#[macro_export]
macro_rules! value_int {
    ($($t:ty => $width:expr),* $(,)?) => {$(

        impl $crate::objects::Value for $t {
            const WIDTH: $crate::objects::Width = $width;

            fn from_raw(raw: u32) -> Self {
                raw as $t
            }
            fn to_raw(self) -> u32 {
                self as i32 as u32
            }
        }
    )*};
}

/// implement [Value](crate::objects::Value) for a bilge bitfield, using its underlying integer as raw form
#[macro_export]
macro_rules! value_bilge {
    ($t:ty, $int:ty) => {

        impl $crate::objects::Value for $t {
            const WIDTH: $crate::objects::Width = <$int as $crate::objects::Value>::WIDTH;

            fn from_raw(raw: u32) -> Self {
                <$t>::from(<$int as $crate::objects::Value>::from_raw(raw))
            }
            fn to_raw(self) -> u32 {
                <$int as $crate::objects::Value>::to_raw(<$int>::from(self))
            }
        }
    };
}
