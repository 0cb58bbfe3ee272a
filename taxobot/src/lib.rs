//! taxobot: sits on an IRC network and serves NickServ TAXONOMY data over
//! HTTP as Turtle.

pub mod bot;
pub mod config;
pub mod relay;
