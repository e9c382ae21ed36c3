//! 聊天传输层。目前只有用于本地试玩的控制台适配器。

pub mod console;
