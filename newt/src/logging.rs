use newt_msg::Message;

pub(crate) fn msg_summary(msg: &Message) -> String {
  format!("{:?} {:?} {}.{:02} with {}b payload",
          msg.ty,
          msg.code.kind(),
          msg.code.class,
          msg.code.detail,
          msg.payload.0.len())
}
