mod helpers;
mod mutation_test;

use kz_testutils::*;

use super::annotations::*;
use super::drift::*;
use super::mode::*;
use super::mutation::*;
use super::parent::*;
use super::policy::*;
use super::*;
