
use kz_testutils::*;

use super::*;
