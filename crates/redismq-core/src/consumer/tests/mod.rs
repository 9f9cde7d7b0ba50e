use super::*;
use crate::error::HandlerError;
use crate::message::Message;
use crate::storage::MemoryConnector;
use std::time::Duration;

mod common;
use common::*;
