use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error(
        "registration deadline of {waited:?} passed with {mappers}/{want_mappers} mappers \
         and {reducers}/{want_reducers} reducers"
    )]
    RegistrationTimeout {
        waited: Duration,
        mappers: usize,
        want_mappers: usize,
        reducers: usize,
        want_reducers: usize,
    },
}
