// src/error.rs

use core::fmt;

// Generates into_inner, Display and Error for enums whose every variant hands
// the rejected element back to the caller.
macro_rules! impl_error_for_enum_with_inner {
    (
        $enum_name:ident < $generic_param:ident >,
        $($variant:ident ( $message:expr ) ),+
        $(,)?
    ) => {
        impl<$generic_param> $enum_name<$generic_param> {
            /// Consumes the error, returning the element that was not delivered.
            #[inline]
            pub fn into_inner(self) -> $generic_param {
                match self {
                    $( $enum_name::$variant(v) => v, )+
                }
            }
        }

        impl<$generic_param> fmt::Display for $enum_name<$generic_param> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( $enum_name::$variant(_) => f.write_str($message), )+
                }
            }
        }

        impl<$generic_param: fmt::Debug> std::error::Error for $enum_name<$generic_param> {}
    };
}

/// Error returned by non-waiting handoff operations (`try_transfer`, and
/// `offer` on a rendezvous queue) when no consumer was waiting.
///
/// The element was not enqueued and is returned to the caller.
#[derive(PartialEq, Eq, Clone)]
pub enum TryTransferError<T> {
  /// No consumer was waiting to receive the element.
  NoReceiver(T),
}

impl<T> fmt::Debug for TryTransferError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TryTransferError::NoReceiver(_) => write!(f, "TryTransferError::NoReceiver(..)"),
    }
  }
}

impl_error_for_enum_with_inner!(
  TryTransferError<T>,
  NoReceiver("no consumer was waiting to receive the element"),
);

/// Error returned by timed handoff operations (`try_transfer_timeout`, and
/// `offer_timeout` on a rendezvous queue) when the deadline passed before a
/// consumer received the element.
///
/// The element was withdrawn and is returned to the caller.
#[derive(PartialEq, Eq, Clone)]
pub enum TransferTimeoutError<T> {
  /// The deadline passed before a consumer received the element.
  Timeout(T),
}

impl<T> fmt::Debug for TransferTimeoutError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TransferTimeoutError::Timeout(_) => write!(f, "TransferTimeoutError::Timeout(..)"),
    }
  }
}

impl_error_for_enum_with_inner!(
  TransferTimeoutError<T>,
  Timeout("timed out waiting for a consumer to receive the element"),
);

impl<T> From<TryTransferError<T>> for TransferTimeoutError<T> {
  fn from(err: TryTransferError<T>) -> Self {
    TransferTimeoutError::Timeout(err.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn errors_hand_back_the_element() {
    let err = TryTransferError::NoReceiver(String::from("job"));
    assert_eq!(format!("{:?}", err), "TryTransferError::NoReceiver(..)");
    assert_eq!(err.to_string(), "no consumer was waiting to receive the element");
    assert_eq!(err.into_inner(), "job");

    let err: TransferTimeoutError<u32> = TryTransferError::NoReceiver(7).into();
    assert_eq!(format!("{:?}", err), "TransferTimeoutError::Timeout(..)");
    assert_eq!(err.into_inner(), 7);
  }
}
